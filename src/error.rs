//! Error types for run-ledger
//!
//! Every fallible operation returns [`Result`]. Point lookups never fail with
//! "not found": they return `Ok(None)` and leave the decision to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// run-ledger error types
#[derive(Error, Debug)]
pub enum Error {
    /// The ledger document exists but cannot be parsed
    #[error("Ledger document {path} is corrupt: {source}\nRestore it from a backup or move it aside to start a fresh ledger")]
    StoreCorrupt {
        /// Path of the backing document
        path: PathBuf,
        /// Parser error
        source: serde_json::Error,
    },

    /// A type shape outside primitives, optionals, nested records and lists
    #[error("Unsupported type shape: {0}")]
    UnsupportedType(String),

    /// A mapping does not fit the declared record shape
    #[error("Type mismatch at `{path}`: expected {expected}")]
    TypeMismatch {
        /// Dotted path of the offending field (`$` is the root)
        path: String,
        /// Human-readable description of the expected shape
        expected: String,
    },

    /// IO error (filesystem, lock acquisition, lock timeout)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Name query pattern failed to compile
    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Configuration file could not be interpreted
    #[error("Invalid configuration {path}: {reason}")]
    InvalidConfig {
        /// Path of the configuration file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Snapshot ignore file could not be compiled
    #[error("Invalid ignore file {path}: {reason}")]
    InvalidIgnoreFile {
        /// Path of the ignore file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A name clashes with an existing run or artifact
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Directory traversal failed for a reason other than plain IO
    #[error("Directory walk failed: {0}")]
    Walk(String),
}

impl Error {
    /// Build a [`Error::TypeMismatch`] for `path`.
    pub(crate) fn mismatch(path: &str, expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        err.into_io_error()
            .map_or_else(|| Self::Walk(message), Self::Io)
    }
}
