use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lifeline_ai::OpenAiAuthScheme;
use lifeline_events::ChildDatePolicy;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(
    name = "lifeline",
    about = "Grow coarse life events into dated event trees with an LLM",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decompose root events into a tree and write it as JSON.
    Decompose(DecomposeArgs),
    /// Rank the events of a decomposed tree against a text query.
    Search(SearchArgs),
    /// Print node counts for a decomposed tree.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliChildDatePolicy {
    Accept,
    DropOutOfRange,
}

impl From<CliChildDatePolicy> for ChildDatePolicy {
    fn from(value: CliChildDatePolicy) -> Self {
        match value {
            CliChildDatePolicy::Accept => ChildDatePolicy::Accept,
            CliChildDatePolicy::DropOutOfRange => ChildDatePolicy::DropOutOfRange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliAuthScheme {
    Bearer,
    ApiKey,
}

impl From<CliAuthScheme> for OpenAiAuthScheme {
    fn from(value: CliAuthScheme) -> Self {
        match value {
            CliAuthScheme::Bearer => OpenAiAuthScheme::Bearer,
            CliAuthScheme::ApiKey => OpenAiAuthScheme::ApiKeyHeader,
        }
    }
}

/// Flags left unset fall back to the `--config` file and then to built-in defaults.
#[derive(Debug, Clone, Args)]
pub struct DecomposeArgs {
    #[arg(long, help = "JSON file holding the root event list")]
    pub events: PathBuf,

    #[arg(long, help = "JSON file describing the simulated person")]
    pub persona: PathBuf,

    #[arg(long, env = "LIFELINE_CONFIG", help = "TOML file with decomposition settings")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LIFELINE_OUTPUT", help = "Where to write the finished tree")]
    pub output: Option<PathBuf>,

    #[arg(long, env = "LIFELINE_MAX_WORKERS", help = "Concurrent model calls per level")]
    pub max_workers: Option<usize>,

    #[arg(long, env = "LIFELINE_MAX_DEPTH", help = "Decomposition rounds before forcing leaves")]
    pub max_depth: Option<usize>,

    #[arg(long, env = "LIFELINE_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "LIFELINE_API_BASE", help = "Base URL of an OpenAI-compatible API")]
    pub api_base: Option<String>,

    #[arg(long, env = "LIFELINE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "LIFELINE_AUTH_SCHEME", value_enum)]
    pub auth_scheme: Option<CliAuthScheme>,

    #[arg(long, env = "LIFELINE_API_VERSION", help = "api-version query value for Azure deployments")]
    pub api_version: Option<String>,

    #[arg(long, env = "LIFELINE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    #[arg(long, env = "LIFELINE_CALL_TIMEOUT_MS", help = "Upper bound for one prompt call including retries")]
    pub call_timeout_ms: Option<u64>,

    #[arg(long, env = "LIFELINE_MAX_RETRIES")]
    pub max_retries: Option<usize>,

    #[arg(long, env = "LIFELINE_TEMPERATURE")]
    pub temperature: Option<f32>,

    #[arg(long, env = "LIFELINE_JSON_MODE")]
    pub json_mode: Option<bool>,

    #[arg(long, env = "LIFELINE_TEMPLATES_DIR", help = "Directory with decompose_root.j2 / decompose_phase.j2")]
    pub templates_dir: Option<PathBuf>,

    #[arg(long, env = "LIFELINE_CHILD_DATE_POLICY", value_enum)]
    pub child_date_policy: Option<CliChildDatePolicy>,

    #[arg(long, env = "LIFELINE_MIN_CHILDREN")]
    pub min_children: Option<usize>,

    #[arg(long, env = "LIFELINE_MAX_CHILDREN")]
    pub max_children: Option<usize>,

    #[arg(long, help = "Keep children in model order instead of sorting by date")]
    pub no_sort: bool,

    #[arg(long, env = "LIFELINE_RUN_LOG", help = "Append a JSON summary line per run to this file")]
    pub run_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    #[arg(long, help = "Decomposed tree JSON")]
    pub tree: PathBuf,

    #[arg(long)]
    pub query: String,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,

    #[arg(long, help = "Earliest date, YYYY-MM-DD")]
    pub from: Option<NaiveDate>,

    #[arg(long, help = "Latest date, YYYY-MM-DD")]
    pub to: Option<NaiveDate>,

    #[arg(long)]
    pub leaves_only: bool,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    #[arg(long, help = "Decomposed tree JSON")]
    pub tree: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CliChildDatePolicy, Cli, Command};

    #[test]
    fn decompose_flags_parse() {
        let cli = Cli::try_parse_from([
            "lifeline",
            "decompose",
            "--events",
            "events.json",
            "--persona",
            "persona.json",
            "--max-workers",
            "3",
            "--child-date-policy",
            "drop-out-of-range",
            "--no-sort",
        ])
        .expect("parse");
        let Command::Decompose(args) = cli.command else {
            panic!("expected decompose");
        };
        assert_eq!(args.max_workers, Some(3));
        assert_eq!(
            args.child_date_policy,
            Some(CliChildDatePolicy::DropOutOfRange)
        );
        assert!(args.no_sort);
        assert!(args.output.is_none() || std::env::var_os("LIFELINE_OUTPUT").is_some());
    }

    #[test]
    fn search_dates_must_be_iso() {
        assert!(Cli::try_parse_from([
            "lifeline", "search", "--tree", "t.json", "--query", "ice", "--from", "2025-01-01",
        ])
        .is_ok());
        assert!(Cli::try_parse_from([
            "lifeline", "search", "--tree", "t.json", "--query", "ice", "--from", "Jan 1",
        ])
        .is_err());
    }

    #[test]
    fn events_and_persona_are_required() {
        assert!(Cli::try_parse_from(["lifeline", "decompose", "--events", "e.json"]).is_err());
    }
}
