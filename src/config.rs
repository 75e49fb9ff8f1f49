//! Configuration - where the ledger, snapshots and results live
//!
//! ```json
//! {
//!   "store_dir": ".runs",
//!   "snapshot_source": "/home/me/project",
//!   "snapshot_dir": "snapshots",
//!   "last_snapshot_link": "snapshots/last",
//!   "ignore_file": "/home/me/project/.gitignore",
//!   "ledger_file": "ledger.json",
//!   "results_dir": "results",
//!   "lock_timeout_ms": 5000
//! }
//! ```
//!
//! `snapshot_dir`, `last_snapshot_link`, `ledger_file` and `results_dir` are
//! resolved against `store_dir` unless absolute. Missing keys take their
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{Ledger, LedgerOptions};
use crate::snapshot::SnapshotManager;
use crate::{Error, Result};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = ".runs/config.json";

/// Default name of the run store directory
pub const DEFAULT_STORE_DIR: &str = ".runs";

/// On-disk layout of a run store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Root of everything the tracker writes
    pub store_dir: PathBuf,
    /// Directory captured by code snapshots
    pub snapshot_source: PathBuf,
    /// Snapshot root (relative to `store_dir`)
    pub snapshot_dir: PathBuf,
    /// Most-recent snapshot symlink (relative to `store_dir`)
    pub last_snapshot_link: PathBuf,
    /// Gitignore-style file filtering snapshots
    pub ignore_file: Option<PathBuf>,
    /// Ledger document (relative to `store_dir`)
    pub ledger_file: PathBuf,
    /// Artifact root (relative to `store_dir`)
    pub results_dir: PathBuf,
    /// Ledger lock timeout in milliseconds (`None` blocks)
    pub lock_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::default_in(cwd)
    }
}

impl Config {
    /// Default layout for a project rooted at `project_dir`.
    #[must_use]
    pub fn default_in(project_dir: impl AsRef<Path>) -> Self {
        let project_dir = project_dir.as_ref();
        Self {
            store_dir: project_dir.join(DEFAULT_STORE_DIR),
            snapshot_source: project_dir.to_path_buf(),
            snapshot_dir: PathBuf::from("snapshots"),
            last_snapshot_link: PathBuf::from("snapshots/last"),
            ignore_file: Some(project_dir.join(".gitignore")),
            ledger_file: PathBuf::from("ledger.json"),
            results_dir: PathBuf::from("results"),
            lock_timeout_ms: None,
        }
    }

    /// Load a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read and
    /// [`Error::InvalidConfig`] if it is not a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(config = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load [`DEFAULT_CONFIG_PATH`] if present, otherwise use the defaults
    /// for the working directory.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_file`].
    pub fn from_default_path_or_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write this configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Resolved snapshot root.
    #[must_use]
    pub fn snapshot_root(&self) -> PathBuf {
        self.store_dir.join(&self.snapshot_dir)
    }

    /// Resolved most-recent snapshot pointer.
    #[must_use]
    pub fn last_snapshot_path(&self) -> PathBuf {
        self.store_dir.join(&self.last_snapshot_link)
    }

    /// Resolved ledger document path.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.store_dir.join(&self.ledger_file)
    }

    /// Resolved artifact root.
    #[must_use]
    pub fn results_root(&self) -> PathBuf {
        self.store_dir.join(&self.results_dir)
    }

    /// Ledger lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Open the configured ledger for writing.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::open_with`].
    pub fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open_with(
            self.ledger_path(),
            LedgerOptions {
                read_only: false,
                lock_timeout: self.lock_timeout(),
            },
        )
    }

    /// Open the configured ledger for queries only.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::open_with`].
    pub fn open_ledger_read_only(&self) -> Result<Ledger> {
        Ledger::open_with(
            self.ledger_path(),
            LedgerOptions {
                read_only: true,
                lock_timeout: self.lock_timeout(),
            },
        )
    }

    /// Snapshot manager for run `id`.
    #[must_use]
    pub fn snapshot_manager(&self, id: &str) -> SnapshotManager {
        let manager = SnapshotManager::new(
            id,
            &self.snapshot_source,
            self.snapshot_root(),
            self.last_snapshot_path(),
        )
        .store_dir(&self.store_dir);
        match &self.ignore_file {
            Some(file) => manager.ignore_file(file),
            None => manager,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = Config::default_in("/work/project");
        assert_eq!(config.ledger_path(), Path::new("/work/project/.runs/ledger.json"));
        assert_eq!(config.snapshot_root(), Path::new("/work/project/.runs/snapshots"));
        assert_eq!(
            config.last_snapshot_path(),
            Path::new("/work/project/.runs/snapshots/last")
        );
        assert_eq!(config.results_root(), Path::new("/work/project/.runs/results"));
        assert!(config.lock_timeout().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults_and_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"store_dir": "/srv/runs", "ledger_file": "/var/db/runs.json", "lock_timeout_ms": 250}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.ledger_path(), Path::new("/var/db/runs.json"));
        assert_eq!(config.results_root(), Path::new("/srv/runs/results"));
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_malformed_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"store_dir": 42}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_in(dir.path());
        let path = dir.path().join(".runs/config.json");
        config.save(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
