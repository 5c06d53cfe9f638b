//! Settings layering for `lifeline decompose`.
//!
//! Precedence is flag, then `LIFELINE_*` environment (both handled by clap),
//! then the TOML file named by `--config`, then built-in defaults. The API key
//! is never read from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lifeline_ai::{OpenAiAuthScheme, RetryPolicy};
use lifeline_events::{default_max_workers, ChildDatePolicy, DEFAULT_MAX_DEPTH};
use serde::Deserialize;

use crate::cli_args::{CliAuthScheme, CliChildDatePolicy, DecomposeArgs};

pub const DEFAULT_OUTPUT_FILE: &str = "event_decompose_dfs.json";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub max_depth: Option<usize>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub auth_scheme: Option<CliAuthScheme>,
    pub api_version: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub temperature: Option<f32>,
    pub json_mode: Option<bool>,
    pub templates_dir: Option<PathBuf>,
    pub child_date_policy: Option<CliChildDatePolicy>,
    pub min_children: Option<usize>,
    pub max_children: Option<usize>,
    pub sort_children: Option<bool>,
    pub run_log: Option<PathBuf>,
}

pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid TOML config {}", path.display()))
}

/// Fully resolved settings for one decomposition run.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposeSettings {
    pub events: PathBuf,
    pub persona: PathBuf,
    pub output: PathBuf,
    pub max_workers: usize,
    pub max_depth: usize,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    pub auth_scheme: OpenAiAuthScheme,
    pub api_version: Option<String>,
    pub request_timeout_ms: u64,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub temperature: f32,
    pub json_mode: bool,
    pub templates_dir: Option<PathBuf>,
    pub child_date_policy: ChildDatePolicy,
    pub min_children: usize,
    pub max_children: usize,
    pub sort_children: bool,
    pub run_log: Option<PathBuf>,
}

impl DecomposeSettings {
    pub fn resolve(args: &DecomposeArgs, file: FileConfig) -> Result<Self> {
        let Some(api_key) = args
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        else {
            bail!("an API key is required: pass --api-key or set LIFELINE_API_KEY");
        };

        let max_workers = args
            .max_workers
            .or(file.max_workers)
            .unwrap_or_else(default_max_workers);
        if max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        let min_children = args.min_children.or(file.min_children).unwrap_or(3);
        let max_children = args.max_children.or(file.max_children).unwrap_or(10);
        if min_children == 0 || min_children > max_children {
            bail!("child count bounds must satisfy 1 <= min ({min_children}) <= max ({max_children})");
        }

        let retry = RetryPolicy {
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .unwrap_or(RetryPolicy::default().max_retries),
            ..RetryPolicy::default()
        };

        Ok(Self {
            events: args.events.clone(),
            persona: args.persona.clone(),
            output: args
                .output
                .clone()
                .or(file.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE)),
            max_workers,
            max_depth: args.max_depth.or(file.max_depth).unwrap_or(DEFAULT_MAX_DEPTH),
            model: args
                .model
                .clone()
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: args
                .api_base
                .clone()
                .or(file.api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key.to_string(),
            auth_scheme: args
                .auth_scheme
                .or(file.auth_scheme)
                .map(OpenAiAuthScheme::from)
                .unwrap_or_default(),
            api_version: args.api_version.clone().or(file.api_version),
            request_timeout_ms: args
                .request_timeout_ms
                .or(file.request_timeout_ms)
                .unwrap_or(120_000),
            call_timeout: Duration::from_millis(
                args.call_timeout_ms.or(file.call_timeout_ms).unwrap_or(180_000),
            ),
            retry,
            temperature: args.temperature.or(file.temperature).unwrap_or(0.7),
            json_mode: args.json_mode.or(file.json_mode).unwrap_or(false),
            templates_dir: args.templates_dir.clone().or(file.templates_dir),
            child_date_policy: args
                .child_date_policy
                .or(file.child_date_policy)
                .map(ChildDatePolicy::from)
                .unwrap_or_default(),
            min_children,
            max_children,
            sort_children: !args.no_sort && file.sort_children.unwrap_or(true),
            run_log: args.run_log.clone().or(file.run_log),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use lifeline_events::ChildDatePolicy;

    use super::{load_file_config, DecomposeSettings, FileConfig, DEFAULT_OUTPUT_FILE};
    use crate::cli_args::{Cli, CliChildDatePolicy, Command, DecomposeArgs};

    fn args(extra: &[&str]) -> DecomposeArgs {
        let mut argv = vec![
            "lifeline",
            "decompose",
            "--events",
            "events.json",
            "--persona",
            "persona.json",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse").command {
            Command::Decompose(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_file_and_file_overrides_defaults() {
        let file = FileConfig {
            max_workers: Some(4),
            max_depth: Some(3),
            model: Some("from-file".to_string()),
            child_date_policy: Some(CliChildDatePolicy::DropOutOfRange),
            ..FileConfig::default()
        };
        let settings = DecomposeSettings::resolve(
            &args(&["--api-key", "k", "--max-workers", "2"]),
            file,
        )
        .expect("settings");
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.max_depth, 3);
        assert_eq!(settings.model, "from-file");
        assert_eq!(settings.child_date_policy, ChildDatePolicy::DropOutOfRange);
        assert_eq!(settings.min_children, 3);
        assert_eq!(settings.max_children, 10);
        assert!(settings.sort_children);
    }

    #[test]
    fn defaults_apply_without_file() {
        let settings =
            DecomposeSettings::resolve(&args(&["--api-key", "k"]), FileConfig::default())
                .expect("settings");
        if std::env::var_os("LIFELINE_OUTPUT").is_none() {
            assert_eq!(settings.output, PathBuf::from(DEFAULT_OUTPUT_FILE));
        }
        assert!(settings.max_workers >= 1);
        assert_eq!(settings.api_key, "k");
    }

    #[test]
    fn missing_api_key_and_bad_bounds_are_rejected() {
        if std::env::var_os("LIFELINE_API_KEY").is_none() {
            assert!(DecomposeSettings::resolve(&args(&[]), FileConfig::default()).is_err());
        }
        assert!(DecomposeSettings::resolve(
            &args(&["--api-key", "k", "--min-children", "5", "--max-children", "2"]),
            FileConfig::default()
        )
        .is_err());
        assert!(DecomposeSettings::resolve(
            &args(&["--api-key", "k", "--max-workers", "0"]),
            FileConfig::default()
        )
        .is_err());
    }

    #[test]
    fn toml_file_is_parsed_and_unknown_keys_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lifeline.toml");
        std::fs::write(
            &path,
            "max_workers = 6\nchild_date_policy = \"drop-out-of-range\"\nsort_children = false\n",
        )
        .expect("write");
        let file = load_file_config(&path).expect("config");
        assert_eq!(file.max_workers, Some(6));
        assert_eq!(file.child_date_policy, Some(CliChildDatePolicy::DropOutOfRange));
        assert_eq!(file.sort_children, Some(false));

        std::fs::write(&path, "api_key = \"secret\"\n").expect("write");
        assert!(load_file_config(&path).is_err());
    }
}
