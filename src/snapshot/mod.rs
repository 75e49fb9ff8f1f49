//! Snapshot Engine - incremental, hardlink-deduplicated code snapshots
//!
//! ## Layout
//!
//! ```text
//! <snapshot_root>/
//!   ├── <run-id-1>/      full copy of the source tree
//!   ├── <run-id-2>/      changed/new files copied, unchanged files hardlinked
//!   └── last -> <snapshot_root>/<run-id-2>
//! ```
//!
//! The first snapshot copies the whole (filtered) source tree. Every later
//! snapshot diffs the source against the directory `last` points at: changed
//! and new files are copied, unchanged files become hardlinks to the previous
//! copy, removed files simply stay in history. Once the new directory is
//! populated, `last` is swapped atomically (symlink + rename).
//!
//! The engine holds no lock: callers serialize snapshots of the same root.
//! A failure while populating leaves the new directory incomplete on disk;
//! only the pointer swap is atomic.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use run_ledger::snapshot::SnapshotManager;
//!
//! let snapshots = SnapshotManager::new("run-001", ".", ".runs/snapshots", ".runs/snapshots/last")
//!     .store_dir(".runs")
//!     .ignore_file(".gitignore");
//! let report = snapshots.make_snapshot()?;
//! println!("{} copied, {} linked", report.copied, report.linked);
//! # Ok::<(), run_ledger::Error>(())
//! ```

pub mod diff;
pub mod filter;
pub mod tree;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

pub use diff::{compare, TreeDiff};
pub use filter::IgnoreFilter;
pub use tree::{scan_tree, EntryKind, Tree};

use crate::Result;

/// How a snapshot was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// No usable previous snapshot: every file copied
    Full,
    /// Diffed against the previous snapshot
    Incremental,
}

/// Outcome of [`SnapshotManager::make_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Directory holding the new snapshot
    pub destination: PathBuf,
    /// Full copy or incremental
    pub kind: SnapshotKind,
    /// Files (and symlinks) written with fresh contents
    pub copied: usize,
    /// Files hardlinked to the previous snapshot
    pub linked: usize,
    /// Paths of the previous snapshot absent from the source
    pub removed: usize,
}

/// Takes snapshots of one source tree into one snapshot root.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    id: String,
    source: PathBuf,
    snapshot_root: PathBuf,
    last_link: PathBuf,
    store_dir: Option<PathBuf>,
    ignore_file: Option<PathBuf>,
}

impl SnapshotManager {
    /// Snapshot `source` as `<snapshot_root>/<id>`, tracking the latest
    /// snapshot through the symlink `last_link`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        snapshot_root: impl Into<PathBuf>,
        last_link: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            snapshot_root: snapshot_root.into(),
            last_link: last_link.into(),
            store_dir: None,
            ignore_file: None,
        }
    }

    /// Directory of the run store, never copied into a snapshot.
    #[must_use]
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Gitignore-style file listing paths to leave out.
    #[must_use]
    pub fn ignore_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.ignore_file = Some(file.into());
        self
    }

    /// Snapshot identifier (the run id).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source directory being captured.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path of the most-recent pointer.
    #[must_use]
    pub fn last_link(&self) -> &Path {
        &self.last_link
    }

    /// Absolute directory the snapshot is written to.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        filter::absolutize(&self.snapshot_root).join(&self.id)
    }

    /// Directory the most-recent pointer currently references, if it
    /// references an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the pointer exists but cannot be read (for
    /// instance because it is not a symlink).
    pub fn last_snapshot(&self) -> Result<Option<PathBuf>> {
        let target = match fs::read_link(&self.last_link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let target = if target.is_relative() {
            self.last_link
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(target)
        } else {
            target
        };
        if target.is_dir() {
            Ok(Some(target))
        } else {
            warn!(
                link = %self.last_link.display(),
                target = %target.display(),
                "Most-recent snapshot pointer is dangling; taking a full snapshot"
            );
            Ok(None)
        }
    }

    /// Build the ignore filter for the current source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be resolved or the ignore file
    /// is invalid.
    pub fn filter(&self) -> Result<IgnoreFilter> {
        let source = fs::canonicalize(&self.source)?;
        let mut filter = IgnoreFilter::from_file(source, self.ignore_file.as_deref())?
            .exclude_dir(&self.snapshot_root);
        if let Some(store) = &self.store_dir {
            filter = filter.exclude_dir(store);
        }
        Ok(filter)
    }

    /// Capture the source tree and repoint the most-recent pointer at it.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning, copying, linking or repointing fails.
    /// The partially populated snapshot directory is left in place.
    pub fn make_snapshot(&self) -> Result<SnapshotReport> {
        fs::create_dir_all(&self.snapshot_root)?;
        let filter = self.filter()?;
        let source_root = filter.root().to_path_buf();
        let tree = scan_tree(&source_root, &filter)?;
        let destination = self.destination();

        let report = match self.last_snapshot()? {
            None => self.copy_full(&source_root, &tree, destination)?,
            Some(baseline) => self.copy_incremental(&source_root, &tree, &baseline, destination)?,
        };
        self.repoint(&report.destination)?;

        info!(
            snapshot = %report.destination.display(),
            kind = ?report.kind,
            copied = report.copied,
            linked = report.linked,
            removed = report.removed,
            "Snapshot complete"
        );
        Ok(report)
    }

    fn copy_full(&self, source_root: &Path, tree: &Tree, destination: PathBuf) -> Result<SnapshotReport> {
        debug!(id = %self.id, entries = tree.len(), "Taking full snapshot");
        fs::create_dir_all(&destination)?;
        let mut copied = 0;
        for (relative, kind) in tree {
            if place(source_root, &destination, relative, kind)? {
                copied += 1;
            }
        }
        Ok(SnapshotReport {
            destination,
            kind: SnapshotKind::Full,
            copied,
            linked: 0,
            removed: 0,
        })
    }

    fn copy_incremental(
        &self,
        source_root: &Path,
        tree: &Tree,
        baseline: &Path,
        destination: PathBuf,
    ) -> Result<SnapshotReport> {
        let previous = scan_tree(baseline, &IgnoreFilter::none(baseline))?;
        let diff = compare(source_root, tree, baseline, &previous)?;
        debug!(
            id = %self.id,
            baseline = %baseline.display(),
            changed = diff.changed.len(),
            new = diff.new.len(),
            unchanged = diff.unchanged.len(),
            removed = diff.removed.len(),
            "Taking incremental snapshot"
        );

        fs::create_dir_all(&destination)?;
        let unchanged: HashSet<&PathBuf> = diff.unchanged.iter().collect();
        let (mut copied, mut linked) = (0, 0);
        for (relative, kind) in tree {
            if *kind == EntryKind::File && unchanged.contains(relative) {
                let target = destination.join(relative);
                ensure_parent(&target)?;
                fs::hard_link(baseline.join(relative), &target)?;
                linked += 1;
            } else if place(source_root, &destination, relative, kind)? {
                copied += 1;
            }
        }
        Ok(SnapshotReport {
            destination,
            kind: SnapshotKind::Incremental,
            copied,
            linked,
            removed: diff.removed.len(),
        })
    }

    /// Swap the most-recent pointer to `destination` atomically.
    fn repoint(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = self.last_link.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut staged = self.last_link.as_os_str().to_os_string();
        staged.push(format!(".{}.tmp", self.id));
        let staged = PathBuf::from(staged);
        if staged.symlink_metadata().is_ok() {
            fs::remove_file(&staged)?;
        }
        symlink(destination, &staged)?;
        fs::rename(&staged, &self.last_link)?;
        Ok(())
    }
}

/// Materialize one source entry under `destination`; returns whether file
/// contents (or a link) were written.
fn place(source_root: &Path, destination: &Path, relative: &Path, kind: &EntryKind) -> Result<bool> {
    let target = destination.join(relative);
    match kind {
        EntryKind::Dir => {
            fs::create_dir_all(&target)?;
            Ok(false)
        }
        EntryKind::File => {
            ensure_parent(&target)?;
            fs::copy(source_root.join(relative), &target)?;
            Ok(true)
        }
        EntryKind::Symlink(link) => {
            ensure_parent(&target)?;
            symlink(link, &target)?;
            Ok(true)
        }
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        source: PathBuf,
        store: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("project");
            fs::create_dir_all(&source).unwrap();
            let store = source.join(".runs");
            Self {
                _dir: dir,
                source,
                store,
            }
        }

        fn manager(&self, id: &str) -> SnapshotManager {
            SnapshotManager::new(
                id,
                &self.source,
                self.store.join("snapshots"),
                self.store.join("snapshots/last"),
            )
            .store_dir(&self.store)
        }
    }

    #[test]
    fn test_store_dir_never_copied() {
        let fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "x").unwrap();

        let report = fx.manager("run-1").make_snapshot().unwrap();
        assert_eq!(report.kind, SnapshotKind::Full);
        assert_eq!(report.copied, 1);
        assert!(!report.destination.join(".runs").exists());
    }

    #[test]
    fn test_relative_pointer_target_is_resolved() {
        let fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "x").unwrap();
        fx.manager("run-1").make_snapshot().unwrap();

        let link = fx.store.join("snapshots/last");
        fs::remove_file(&link).unwrap();
        symlink("run-1", &link).unwrap();

        let report = fx.manager("run-2").make_snapshot().unwrap();
        assert_eq!(report.kind, SnapshotKind::Incremental);
        assert_eq!(report.linked, 1);
    }

    #[test]
    fn test_dangling_pointer_falls_back_to_full_copy() {
        let fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "x").unwrap();
        fs::create_dir_all(fx.store.join("snapshots")).unwrap();
        symlink(fx.store.join("snapshots/vanished"), fx.store.join("snapshots/last")).unwrap();

        let report = fx.manager("run-1").make_snapshot().unwrap();
        assert_eq!(report.kind, SnapshotKind::Full);
    }

    #[test]
    fn test_unchanged_files_share_inode() {
        let fx = Fixture::new();
        fs::write(fx.source.join("keep.txt"), "same").unwrap();
        let first = fx.manager("run-1").make_snapshot().unwrap();
        let second = fx.manager("run-2").make_snapshot().unwrap();

        let a = fs::metadata(first.destination.join("keep.txt")).unwrap();
        let b = fs::metadata(second.destination.join("keep.txt")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(b.nlink(), 2);
        assert_eq!(second.copied, 0);
    }
}
