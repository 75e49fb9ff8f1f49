//! Three-way comparison of a source tree against the previous snapshot

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::tree::{EntryKind, Tree};
use crate::Result;

const COMPARE_CHUNK: usize = 64 * 1024;

/// Classification of every relative path of two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Present in both, content differs (or the entry kind changed)
    pub changed: Vec<PathBuf>,
    /// Present only in the source
    pub new: Vec<PathBuf>,
    /// Present in both and byte-identical
    pub unchanged: Vec<PathBuf>,
    /// Present only in the previous snapshot
    pub removed: Vec<PathBuf>,
}

impl TreeDiff {
    /// Whether the source matches the previous snapshot exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.new.is_empty() && self.removed.is_empty()
    }
}

/// Compare `source` (scanned under `source_root`) with `baseline` (scanned
/// under `baseline_root`).
///
/// Regular files are compared by size, then byte by byte. Directories compare
/// equal when both sides are directories; symlinks when their targets match.
///
/// # Errors
///
/// Returns an IO error if a file pair cannot be read.
pub fn compare(
    source_root: &Path,
    source: &Tree,
    baseline_root: &Path,
    baseline: &Tree,
) -> Result<TreeDiff> {
    let file_pairs: Vec<&PathBuf> = source
        .iter()
        .filter(|(path, kind)| {
            **kind == EntryKind::File && baseline.get(*path) == Some(&EntryKind::File)
        })
        .map(|(path, _)| path)
        .collect();

    let identical = |path: &&PathBuf| {
        same_contents(&source_root.join(path), &baseline_root.join(path))
    };
    #[cfg(feature = "rayon")]
    let verdicts: Vec<io::Result<bool>> = file_pairs.par_iter().map(identical).collect();
    #[cfg(not(feature = "rayon"))]
    let verdicts: Vec<io::Result<bool>> = file_pairs.iter().map(identical).collect();

    let mut same_files = std::collections::HashSet::with_capacity(file_pairs.len());
    for (path, verdict) in file_pairs.into_iter().zip(verdicts) {
        if verdict? {
            same_files.insert(path);
        }
    }

    let mut diff = TreeDiff::default();
    for (path, kind) in source {
        match (kind, baseline.get(path)) {
            (_, None) => diff.new.push(path.clone()),
            (EntryKind::File, Some(EntryKind::File)) => {
                if same_files.contains(path) {
                    diff.unchanged.push(path.clone());
                } else {
                    diff.changed.push(path.clone());
                }
            }
            (ours, Some(theirs)) if ours == theirs => diff.unchanged.push(path.clone()),
            (_, Some(_)) => diff.changed.push(path.clone()),
        }
    }
    diff.removed = baseline
        .keys()
        .filter(|path| !source.contains_key(*path))
        .cloned()
        .collect();
    Ok(diff)
}

/// Byte-for-byte comparison of two regular files.
///
/// # Errors
///
/// Returns an IO error if either file cannot be read.
pub fn same_contents(left: &Path, right: &Path) -> io::Result<bool> {
    let (left_meta, right_meta) = (fs::metadata(left)?, fs::metadata(right)?);
    if left_meta.len() != right_meta.len() {
        return Ok(false);
    }
    if left_meta.dev() == right_meta.dev() && left_meta.ino() == right_meta.ino() {
        return Ok(true);
    }

    let mut left = BufReader::with_capacity(COMPARE_CHUNK, File::open(left)?);
    let mut right = BufReader::with_capacity(COMPARE_CHUNK, File::open(right)?);
    loop {
        let (ours, theirs) = (left.fill_buf()?, right.fill_buf()?);
        if ours.is_empty() || theirs.is_empty() {
            return Ok(ours.is_empty() && theirs.is_empty());
        }
        let n = ours.len().min(theirs.len());
        if ours[..n] != theirs[..n] {
            return Ok(false);
        }
        left.consume(n);
        right.consume(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::filter::IgnoreFilter;
    use crate::snapshot::tree::scan_tree;

    fn scan(root: &Path) -> Tree {
        scan_tree(root, &IgnoreFilter::none(root)).unwrap()
    }

    #[test]
    fn test_classifies_every_path() {
        let source = tempfile::tempdir().unwrap();
        let baseline = tempfile::tempdir().unwrap();
        fs::write(source.path().join("same.txt"), "same").unwrap();
        fs::write(baseline.path().join("same.txt"), "same").unwrap();
        fs::write(source.path().join("edit.txt"), "new body").unwrap();
        fs::write(baseline.path().join("edit.txt"), "old body").unwrap();
        fs::write(source.path().join("added.txt"), "added").unwrap();
        fs::write(baseline.path().join("gone.txt"), "gone").unwrap();

        let diff = compare(
            source.path(),
            &scan(source.path()),
            baseline.path(),
            &scan(baseline.path()),
        )
        .unwrap();

        assert_eq!(diff.unchanged, vec![PathBuf::from("same.txt")]);
        assert_eq!(diff.changed, vec![PathBuf::from("edit.txt")]);
        assert_eq!(diff.new, vec![PathBuf::from("added.txt")]);
        assert_eq!(diff.removed, vec![PathBuf::from("gone.txt")]);
        assert!(!diff.is_clean());
    }

    #[test]
    fn test_kind_change_is_changed() {
        let source = tempfile::tempdir().unwrap();
        let baseline = tempfile::tempdir().unwrap();
        fs::create_dir(source.path().join("thing")).unwrap();
        fs::write(baseline.path().join("thing"), "file").unwrap();

        let diff = compare(
            source.path(),
            &scan(source.path()),
            baseline.path(),
            &scan(baseline.path()),
        )
        .unwrap();
        assert_eq!(diff.changed, vec![PathBuf::from("thing")]);
    }

    #[test]
    fn test_same_contents_equal_length_different_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        fs::write(&a, vec![7_u8; COMPARE_CHUNK * 2 + 3]).unwrap();
        let mut other = vec![7_u8; COMPARE_CHUNK * 2 + 3];
        other[COMPARE_CHUNK + 1] = 8;
        fs::write(&b, other).unwrap();

        assert!(!same_contents(&a, &b).unwrap());
        assert!(same_contents(&a, &a).unwrap());
    }
}
