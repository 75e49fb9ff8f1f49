//! Ignore filtering for snapshot sources
//!
//! Paths are matched relative to the source root with gitignore semantics.
//! Directories registered through [`IgnoreFilter::exclude_dir`] (the run
//! store and the snapshot root) are always skipped, ignore file or not.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

use crate::{Error, Result};

/// Decides which source paths stay out of a snapshot.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    root: PathBuf,
    matcher: Option<Gitignore>,
    excluded: Vec<PathBuf>,
}

impl IgnoreFilter {
    /// A filter that excludes nothing.
    #[must_use]
    pub fn none(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            matcher: None,
            excluded: Vec::new(),
        }
    }

    /// Compile `ignore_file` (gitignore syntax) for the tree at `root`.
    ///
    /// An absent or missing ignore file excludes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIgnoreFile`] when the file cannot be read or
    /// contains an invalid glob.
    pub fn from_file(root: impl Into<PathBuf>, ignore_file: Option<&Path>) -> Result<Self> {
        let root = root.into();
        let Some(file) = ignore_file.filter(|f| f.is_file()) else {
            debug!(root = %root.display(), "No ignore file; snapshotting every path");
            return Ok(Self::none(root));
        };

        let mut builder = GitignoreBuilder::new(&root);
        if let Some(err) = builder.add(file) {
            return Err(invalid(file, &err));
        }
        let matcher = builder.build().map_err(|err| invalid(file, &err))?;
        debug!(
            ignore_file = %file.display(),
            patterns = matcher.num_ignores(),
            "Loaded ignore patterns"
        );
        Ok(Self {
            root,
            matcher: Some(matcher),
            excluded: Vec::new(),
        })
    }

    /// Always exclude `dir` (absolute, or relative to the working directory).
    #[must_use]
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        self.excluded.push(absolutize(dir));
        self
    }

    /// Root the relative paths are resolved against.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `relative` (a path under the root) is left out.
    #[must_use]
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if !self.excluded.is_empty() {
            let absolute = self.root.join(relative);
            if self.excluded.iter().any(|dir| absolute.starts_with(dir)) {
                return true;
            }
        }
        self.matcher.as_ref().is_some_and(|matcher| {
            matcher
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore()
        })
    }
}

/// Canonical form of `path` when it exists, otherwise an absolute join onto
/// the working directory.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

fn invalid(file: &Path, err: &ignore::Error) -> Error {
    Error::InvalidIgnoreFile {
        path: file.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_ignore_file_excludes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let filter =
            IgnoreFilter::from_file(dir.path(), Some(&dir.path().join(".gitignore"))).unwrap();
        assert!(!filter.is_excluded(Path::new("a.txt"), false));

        let filter = IgnoreFilter::from_file(dir.path(), None).unwrap();
        assert!(!filter.is_excluded(Path::new("a.txt"), false));
    }

    #[test]
    fn test_gitignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let ignore_file = dir.path().join(".gitignore");
        fs::write(&ignore_file, "*.log\nbuild/\n!keep.log\n").unwrap();
        let filter = IgnoreFilter::from_file(dir.path(), Some(&ignore_file)).unwrap();

        assert!(filter.is_excluded(Path::new("debug.log"), false));
        assert!(!filter.is_excluded(Path::new("keep.log"), false));
        assert!(filter.is_excluded(Path::new("build"), true));
        assert!(filter.is_excluded(Path::new("build/out.bin"), false));
        assert!(!filter.is_excluded(Path::new("src/main.rs"), false));
    }

    #[test]
    fn test_excluded_dirs_always_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join(".runs")).unwrap();
        let filter = IgnoreFilter::none(&root).exclude_dir(&root.join(".runs"));

        assert!(filter.is_excluded(Path::new(".runs"), true));
        assert!(filter.is_excluded(Path::new(".runs/ledger.json"), false));
        assert!(!filter.is_excluded(Path::new(".runsx"), true));
    }
}
