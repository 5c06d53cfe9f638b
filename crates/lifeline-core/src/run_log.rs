use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

pub const RUN_LOG_MAX_BYTES_ENV: &str = "LIFELINE_RUN_LOG_MAX_BYTES";
pub const RUN_LOG_KEEP_ENV: &str = "LIFELINE_RUN_LOG_KEEP";

/// When the active run log is rolled over and how many rolled files survive.
///
/// `max_bytes == 0` disables rotation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 4 << 20,
            keep: 5,
        }
    }
}

impl LogRotationPolicy {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable or zero values keep the default for that field.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn positive<N: std::str::FromStr + Default + PartialEq>(raw: Option<String>) -> Option<N> {
            raw?.trim().parse::<N>().ok().filter(|value| *value != N::default())
        }
        let base = Self::default();
        Self {
            max_bytes: positive(lookup(RUN_LOG_MAX_BYTES_ENV)).unwrap_or(base.max_bytes),
            keep: positive(lookup(RUN_LOG_KEEP_ENV)).unwrap_or(base.keep),
        }
    }

    fn rotates(&self) -> bool {
        self.max_bytes != 0 && self.keep != 0
    }
}

/// Append-only NDJSON file with one summary record per decomposition run.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    policy: LogRotationPolicy,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, policy: LogRotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record).context("run log record is not serializable")?;
        line.push('\n');

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        if self.would_overflow(line.len() as u64) {
            self.roll_over()?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    fn would_overflow(&self, incoming: u64) -> bool {
        if !self.policy.rotates() {
            return false;
        }
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() > 0 && meta.len().saturating_add(incoming) > self.policy.max_bytes,
            Err(_) => false,
        }
    }

    /// `runs.ndjson` becomes `runs.ndjson.1`; older files move up one slot and
    /// the slot past `keep` is discarded.
    fn roll_over(&self) -> Result<()> {
        let oldest = self.rolled(self.policy.keep);
        if oldest.exists() {
            std::fs::remove_file(&oldest)
                .with_context(|| format!("failed to remove {}", oldest.display()))?;
        }
        for slot in (1..self.policy.keep).rev() {
            let from = self.rolled(slot);
            if from.exists() {
                let to = self.rolled(slot + 1);
                std::fs::rename(&from, &to)
                    .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;
            }
        }
        let first = self.rolled(1);
        std::fs::rename(&self.path, &first)
            .with_context(|| format!("failed to roll {} over", self.path.display()))
    }

    fn rolled(&self, slot: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{slot}"));
        PathBuf::from(name)
    }
}
