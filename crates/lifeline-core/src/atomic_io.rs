use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::time_utils::current_unix_timestamp_ms;

/// Sibling temp file that is removed unless it was renamed into place.
struct PendingFile {
    path: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn beside(target: &Path, dir: &Path) -> Self {
        let stem = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lifeline-output".to_string());
        let name = format!(".{stem}.{}.{}.partial", std::process::id(), current_unix_timestamp_ms());
        Self {
            path: dir.join(name),
            committed: false,
        }
    }

    fn commit(mut self, target: &Path) -> Result<()> {
        std::fs::rename(&self.path, target).with_context(|| {
            format!("failed to move {} into place at {}", self.path.display(), target.display())
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Replaces `path` with `content` so readers see either the old or the new file.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("output path is empty");
    }
    if path.is_dir() {
        bail!("output path {} is a directory", path.display());
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let pending = PendingFile::beside(path, dir);
    let mut file = File::create(&pending.path)
        .with_context(|| format!("failed to create {}", pending.path.display()))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", pending.path.display()))?;
    drop(file);
    pending.commit(path)
}

/// Pretty JSON with a trailing newline; non-ASCII text is written as-is.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut rendered = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to render JSON for {}", path.display()))?;
    rendered.push('\n');
    write_text_atomic(path, &rendered)
}
