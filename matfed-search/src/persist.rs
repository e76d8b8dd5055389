//! Small file helpers shared by the on-disk cache, health, and discovery stores.

use std::path::{Path, PathBuf};

use crate::error::{Result, SearchError};

/// File changes computed while a store is locked and applied once the lock
/// is released.
#[derive(Debug, Default)]
pub(crate) struct DiskWrites {
    removals: Vec<PathBuf>,
    writes: Vec<(PathBuf, String)>,
}

impl DiskWrites {
    pub(crate) fn write(&mut self, path: PathBuf, content: String) {
        self.writes.push((path, content));
    }

    pub(crate) fn remove(&mut self, path: PathBuf) {
        self.removals.push(path);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.writes.is_empty()
    }

    /// Apply removals, then writes. Returns the number of files written.
    pub(crate) fn apply(self) -> Result<usize> {
        for path in &self.removals {
            remove_if_exists(path)?;
        }
        for (path, content) in &self.writes {
            write_atomic(path, content)?;
        }
        Ok(self.writes.len())
    }

    /// [`apply`](Self::apply) on the blocking thread pool.
    pub(crate) async fn apply_blocking(self) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        tokio::task::spawn_blocking(move || self.apply())
            .await
            .map_err(|e| SearchError::Io(std::io::Error::other(e)))?
    }
}

/// Write `content` to `path` via a temp file and rename, creating parent
/// directories as needed. Readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id()
    );
    let tmp_path = path
        .parent()
        .map(|p| p.join(&tmp_name))
        .unwrap_or_else(|| PathBuf::from(&tmp_name));

    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
