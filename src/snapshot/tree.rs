//! Directory tree scanning

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::filter::IgnoreFilter;
use crate::{Error, Result};

/// What lives at a relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory
    Dir,
    /// Regular file
    File,
    /// Symbolic link, with its (unresolved) target
    Symlink(PathBuf),
}

/// Relative path -> entry, ordered so parents precede their children.
pub type Tree = BTreeMap<PathBuf, EntryKind>;

/// Scan `root` without following links, pruning excluded directories.
///
/// Sockets, FIFOs and device nodes are skipped.
///
/// # Errors
///
/// Returns an error if any directory under `root` cannot be read.
pub fn scan_tree(root: &Path, filter: &IgnoreFilter) -> Result<Tree> {
    let mut tree = Tree::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.path().strip_prefix(root).map_or(true, |relative| {
                !filter.is_excluded(relative, entry.file_type().is_dir())
            })
        });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Walk(e.to_string()))?
            .to_path_buf();
        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_symlink() {
            EntryKind::Symlink(fs::read_link(entry.path())?)
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        tree.insert(relative, kind);
    }
    Ok(tree)
}
