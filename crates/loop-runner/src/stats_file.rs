//! JSON file statistics store.
//!
//! Saves go through a temp file and a rename, keeping the previous file as
//! a `.backup` next to it. Loading falls back to the backup when the
//! primary file is corrupt.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use coordination::{StatsSnapshot, StatsStore, StatsStoreError};
use tracing::{debug, warn};

/// Agent statistics persisted as one pretty-printed JSON object.
#[derive(Debug, Clone)]
pub struct JsonFileStatsStore {
    path: PathBuf,
}

impl JsonFileStatsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        self.sibling(".backup")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// `suffix` appended to the full file name, keeping its extension.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("stats"));
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn read(path: &Path) -> Result<StatsSnapshot, StatsStoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl StatsStore for JsonFileStatsStore {
    fn load(&self) -> Result<StatsSnapshot, StatsStoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No stats file yet, starting empty");
            return Ok(StatsSnapshot::new());
        }

        let primary_err = match Self::read(&self.path) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => e,
        };
        warn!(path = %self.path.display(), error = %primary_err, "Stats file unreadable, trying backup");

        let backup_path = self.backup_path();
        if backup_path.exists() {
            match Self::read(&backup_path) {
                Ok(snapshot) => {
                    warn!(path = %backup_path.display(), agents = snapshot.len(), "Recovered stats from backup");
                    return Ok(snapshot);
                }
                Err(e) => warn!(path = %backup_path.display(), error = %e, "Backup also unreadable"),
            }
        }

        // Refuse to start from zero over a file we could not read.
        Err(primary_err)
    }

    fn flush(&self, snapshot: &StatsSnapshot) -> Result<(), StatsStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, self.backup_path()) {
                warn!(error = %e, "Failed to refresh stats backup");
            }
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let temp_path = self.temp_path();
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;

        debug!(path = %self.path.display(), agents = snapshot.len(), "Stats flushed");
        Ok(())
    }
}
