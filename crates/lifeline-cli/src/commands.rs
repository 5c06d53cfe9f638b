use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lifeline_ai::{ChatPromptClient, ChatPromptOptions, OpenAiClient, OpenAiConfig, PromptClient};
use lifeline_core::{
    current_unix_timestamp_ms, elapsed_since_ms, write_json_atomic, LogRotationPolicy, RunLog,
};
use lifeline_events::{
    finalize_tree, parse_event_list, tree_stats, DecomposerConfig, DecompositionReport,
    DriverOptions, EventNode, FinalizeOptions, ParallelDfsDriver, PromptTemplates, TreeDecomposer,
};
use lifeline_memory::{EventMemoryIndex, SearchOptions, DEFAULT_EMBEDDING_DIMENSIONS};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli_args::{Cli, Command, DecomposeArgs, InspectArgs, SearchArgs};
use crate::config::{load_file_config, DecomposeSettings, FileConfig};

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Decompose(args) => run_decompose(args).await,
        Command::Search(args) => run_search(&args),
        Command::Inspect(args) => run_inspect(&args),
    }
}

#[derive(Debug, Serialize)]
struct RunLogRecord<'a> {
    timestamp_unix_ms: u64,
    duration_ms: u64,
    events: String,
    output: String,
    model: &'a str,
    max_workers: usize,
    max_depth: usize,
    roots: usize,
    total_nodes: usize,
    report: &'a DecompositionReport,
}

async fn run_decompose(args: DecomposeArgs) -> Result<()> {
    let file = match &args.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };
    let settings = DecomposeSettings::resolve(&args, file)?;

    let roots = read_events(&settings.events)?;
    let persona = read_persona(&settings.persona)?;
    let templates = match &settings.templates_dir {
        Some(dir) => PromptTemplates::from_dir(dir)
            .with_context(|| format!("failed to load templates from {}", dir.display()))?,
        None => PromptTemplates::default(),
    };
    let client = build_prompt_client(&settings)?;

    let mut config = DecomposerConfig::new(persona);
    config.child_date_policy = settings.child_date_policy;
    config.min_children = settings.min_children;
    config.max_children = settings.max_children;
    config.json_object = settings.json_mode;
    let decomposer = Arc::new(TreeDecomposer::new(client, templates, config));
    let driver = ParallelDfsDriver::new(
        decomposer,
        DriverOptions {
            max_workers: settings.max_workers,
            max_depth: settings.max_depth,
        },
    );

    let started_ms = current_unix_timestamp_ms();
    let (mut tree, report) = driver.decompose_tree_with_report(roots).await;
    finalize_tree(
        &mut tree,
        FinalizeOptions {
            sort_children: settings.sort_children,
            ..FinalizeOptions::default()
        },
    );
    write_json_atomic(&settings.output, &tree)
        .with_context(|| format!("failed to write {}", settings.output.display()))?;

    let stats = tree_stats(&tree);
    if report.failed > 0 {
        warn!(failed = report.failed, "some events could not be decomposed");
    }
    info!(
        output = %settings.output.display(),
        nodes = stats.total,
        leaves = stats.leaves,
        "{report}"
    );

    if let Some(path) = &settings.run_log {
        let record = RunLogRecord {
            timestamp_unix_ms: started_ms,
            duration_ms: elapsed_since_ms(started_ms),
            events: settings.events.display().to_string(),
            output: settings.output.display().to_string(),
            model: &settings.model,
            max_workers: settings.max_workers,
            max_depth: settings.max_depth,
            roots: stats.roots,
            total_nodes: stats.total,
            report: &report,
        };
        RunLog::new(path, LogRotationPolicy::from_env())
            .append(&record)
            .with_context(|| format!("failed to append run log {}", path.display()))?;
    }
    Ok(())
}

fn build_prompt_client(settings: &DecomposeSettings) -> Result<Arc<dyn PromptClient>> {
    let mut http = OpenAiConfig::new(settings.api_base.clone(), settings.api_key.clone());
    http.request_timeout_ms = settings.request_timeout_ms;
    http.retry = settings.retry;
    http.auth_scheme = settings.auth_scheme;
    http.api_version = settings.api_version.clone();
    let llm = OpenAiClient::new(http).context("failed to build LLM client")?;

    let mut options = ChatPromptOptions::new(settings.model.clone());
    options.temperature = Some(settings.temperature);
    options.json_mode = settings.json_mode;
    options.call_timeout = settings.call_timeout;
    Ok(Arc::new(ChatPromptClient::new(Arc::new(llm), options)))
}

fn read_events(path: &Path) -> Result<Vec<EventNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read events {}", path.display()))?;
    let mut roots = parse_event_list(&raw)
        .with_context(|| format!("invalid event list {}", path.display()))?;
    for (index, root) in roots.iter_mut().enumerate() {
        if root.event_id.is_empty() {
            root.event_id = (index + 1).to_string();
        }
    }
    Ok(roots)
}

/// Persona files are usually JSON; anything else is passed through as text.
fn read_persona(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read persona {}", path.display()))?;
    Ok(match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => serde_json::to_string_pretty(&value)?,
        Err(_) => raw.trim().to_string(),
    })
}

fn read_tree(path: &Path) -> Result<Vec<EventNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tree {}", path.display()))?;
    parse_event_list(&raw).with_context(|| format!("invalid event tree {}", path.display()))
}

fn run_search(args: &SearchArgs) -> Result<()> {
    let tree = read_tree(&args.tree)?;
    let index = EventMemoryIndex::from_tree(&tree, DEFAULT_EMBEDDING_DIMENSIONS);
    let window = match (args.from, args.to) {
        (None, None) => None,
        (from, to) => Some((
            from.unwrap_or(chrono::NaiveDate::MIN),
            to.unwrap_or(chrono::NaiveDate::MAX),
        )),
    };
    let options = SearchOptions {
        limit: args.limit,
        window,
        leaves_only: args.leaves_only,
        ..SearchOptions::default()
    };

    let hits = index.search(&args.query, &options);
    let mut stdout = std::io::stdout().lock();
    for hit in &hits {
        writeln!(stdout, "{}", serde_json::to_string(hit)?)?;
    }
    info!(hits = hits.len(), indexed = index.len(), "search complete");
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    let tree = read_tree(&args.tree)?;
    let stats = tree_stats(&tree);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
