//! Ledger Store - file-backed, lock-protected store of run records
//!
//! The ledger is one JSON document holding every run:
//!
//! ```text
//! {"runs": [ {"id": "...", "name": "...", "metrics": [...], ...}, ... ]}
//! ```
//!
//! Every public call takes the sibling `<path>.lock` for its whole duration
//! (shared for reads, exclusive for writes) and releases it on return. Writes
//! replace the document atomically through a temp file in the same directory.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use run_ledger::ledger::Ledger;
//! use run_ledger::record::RunRecord;
//!
//! let ledger = Ledger::open(".runs/ledger.json")?;
//! ledger.add_new(&[RunRecord::new("run-001", "baseline")])?;
//!
//! let run = ledger.get_by_id("run-001")?.expect("just added");
//! assert_eq!(run.name(), "baseline");
//! # Ok::<(), run_ledger::Error>(())
//! ```

pub mod lock;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::record::{AsUnixSeconds, RunRecord};
use crate::schema;
use crate::{Error, Result};

pub use lock::{LedgerLock, LockGuard, LockMode, LOCK_SUFFIX};

/// On-disk document: a single array of record mappings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    runs: Vec<Value>,
}

/// Options for opening a [`Ledger`].
#[derive(Debug, Clone, Default)]
pub struct LedgerOptions {
    /// Turn every mutating call into a silent no-op.
    pub read_only: bool,
    /// Give up waiting for the lock after this long (`None` blocks).
    pub lock_timeout: Option<Duration>,
}

/// Handle on a ledger document.
///
/// Handles are cheap; independent handles (threads or processes) on the same
/// path coordinate through the lock file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    lock: LedgerLock,
    read_only: bool,
}

impl Ledger {
    /// Open (creating if needed) a writable ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory or document cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, LedgerOptions::default())
    }

    /// Open a read-only ledger at `path`.
    ///
    /// Mutating calls on the returned handle do nothing and report success.
    /// A missing document is not created; it reads as an empty ledger.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches [`Ledger::open`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(
            path,
            LedgerOptions {
                read_only: true,
                ..LedgerOptions::default()
            },
        )
    }

    /// Open a ledger with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a writable ledger cannot be initialized.
    pub fn open_with(path: impl AsRef<Path>, options: LedgerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = Self {
            lock: LedgerLock::for_ledger(&path, options.lock_timeout),
            path,
            read_only: options.read_only,
        };
        if !ledger.read_only {
            ledger.initialize()?;
        }
        Ok(ledger)
    }

    fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.parent_dir() {
            fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            return Ok(());
        }
        let _guard = self.lock.acquire(LockMode::Exclusive)?;
        if !self.path.exists() {
            self.store(&LedgerDocument::default())?;
            info!(ledger = %self.path.display(), "Initialized empty ledger");
        }
        Ok(())
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock marker file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Whether mutating calls are ignored.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Append each record unless its id is already stored.
    ///
    /// Duplicates (against storage or earlier in `records`) are skipped with
    /// a warning; the batch as a whole still succeeds.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or serialization errors.
    pub fn add_new(&self, records: &[RunRecord]) -> Result<()> {
        self.write_section("add_new", |rows| {
            let mut known: HashSet<String> =
                rows.iter().filter_map(row_id).map(str::to_owned).collect();
            let mut appended = 0_usize;
            for record in records {
                if !known.insert(record.id().to_owned()) {
                    warn!(
                        ledger = %self.path.display(),
                        run_id = record.id(),
                        "Run already exists; it will not be overwritten"
                    );
                    continue;
                }
                rows.push(schema::to_mapping(record)?);
                appended += 1;
            }
            debug!(appended, skipped = records.len() - appended, "add_new");
            Ok(((), appended > 0))
        })
    }

    /// Replace the stored record with the same id, or append it.
    ///
    /// Lookup and write happen inside one exclusive critical section, so two
    /// processes racing on the same id cannot both append it.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or serialization errors.
    pub fn add_or_update(&self, record: &RunRecord) -> Result<()> {
        self.write_section("add_or_update", |rows| {
            let mapping = schema::to_mapping(record)?;
            match rows.iter_mut().find(|row| row_id(row) == Some(record.id())) {
                Some(slot) => *slot = mapping,
                None => rows.push(mapping),
            }
            Ok(((), true))
        })
    }

    /// Replace stored records whose ids match; unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or serialization errors.
    pub fn update(&self, records: &[RunRecord]) -> Result<()> {
        let by_id: HashMap<&str, &RunRecord> = records.iter().map(|r| (r.id(), r)).collect();
        self.write_section("update", |rows| {
            let mut replaced = 0_usize;
            for slot in rows.iter_mut() {
                let Some(record) = row_id(slot).and_then(|id| by_id.get(id).copied()) else {
                    continue;
                };
                *slot = schema::to_mapping(record)?;
                replaced += 1;
            }
            debug!(replaced, requested = records.len(), "update");
            Ok(((), replaced > 0))
        })
    }

    /// Apply `change` to the stored record with `id`, in one critical section.
    ///
    /// Returns whether a record was found.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or (de)serialization errors.
    pub fn modify(&self, id: &str, change: impl FnOnce(&mut RunRecord)) -> Result<bool> {
        self.write_section("modify", |rows| {
            let Some(slot) = rows.iter_mut().find(|row| row_id(row) == Some(id)) else {
                return Ok((false, false));
            };
            let mut record: RunRecord = schema::from_mapping(slot)?;
            change(&mut record);
            *slot = schema::to_mapping(&record)?;
            Ok((true, true))
        })
    }

    /// Remove the first stored record with `record`'s id.
    ///
    /// # Errors
    ///
    /// Returns IO or corruption errors.
    pub fn delete(&self, record: &RunRecord) -> Result<bool> {
        self.delete_by_id(record.id())
    }

    /// Remove the first stored record with `id`; report whether one was removed.
    ///
    /// # Errors
    ///
    /// Returns IO or corruption errors.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.write_section("delete", |rows| {
            match rows.iter().position(|row| row_id(row) == Some(id)) {
                Some(index) => {
                    rows.remove(index);
                    Ok((true, true))
                }
                None => Ok((false, false)),
            }
        })
    }

    /// Reset the ledger to an empty array, even if the document is corrupt.
    ///
    /// # Errors
    ///
    /// Returns IO errors.
    pub fn delete_all(&self) -> Result<()> {
        if self.skip_read_only("delete_all") {
            return Ok(());
        }
        let _guard = self.lock.acquire(LockMode::Exclusive)?;
        self.store(&LedgerDocument::default())?;
        info!(ledger = %self.path.display(), "Cleared ledger");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Every stored record, in storage order.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn all(&self) -> Result<Vec<RunRecord>> {
        self.read_section(|rows| decode_all(rows.iter()))
    }

    /// Number of stored (top-level) records.
    ///
    /// # Errors
    ///
    /// Returns IO or corruption errors.
    pub fn len(&self) -> Result<usize> {
        self.read_section(|rows| Ok(rows.len()))
    }

    /// Whether the ledger holds no records.
    ///
    /// # Errors
    ///
    /// Returns IO or corruption errors.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Exact id lookup.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_by_id(&self, id: &str) -> Result<Option<RunRecord>> {
        self.read_section(|rows| {
            rows.iter()
                .find(|row| row_id(row) == Some(id))
                .map(schema::from_mapping)
                .transpose()
        })
    }

    /// First record (in storage order) whose name is exactly `name`.
    ///
    /// Warns when the name is ambiguous.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_by_exact_name(&self, name: &str) -> Result<Option<RunRecord>> {
        self.read_section(|rows| {
            let matches: Vec<&Value> = rows.iter().filter(|row| row_name(row) == Some(name)).collect();
            if matches.len() > 1 {
                warn!(
                    name,
                    count = matches.len(),
                    "Several runs share this name; returning the first one"
                );
            }
            matches.first().map(|row| schema::from_mapping(row)).transpose()
        })
    }

    /// Every record whose name is exactly `name`, in storage order.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_all_by_exact_name(&self, name: &str) -> Result<Vec<RunRecord>> {
        self.read_section(|rows| decode_all(rows.iter().filter(|row| row_name(row) == Some(name))))
    }

    /// Records whose name starts with the literal text `fragment`.
    ///
    /// Like [`Ledger::get_by_name_regex`], matching is anchored at the start
    /// of the name; regex metacharacters in `fragment` have no meaning.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_by_name_contains(&self, fragment: &str) -> Result<Vec<RunRecord>> {
        self.read_section(|rows| {
            decode_all(
                rows.iter()
                    .filter(|row| row_name(row).is_some_and(|name| name.starts_with(fragment))),
            )
        })
    }

    /// Records whose name matches `pattern` anchored at its start.
    ///
    /// `test\d` matches `test1` and `test12` but not `my-test1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for a malformed pattern, otherwise
    /// IO, corruption or deserialization errors.
    pub fn get_by_name_regex(&self, pattern: &str) -> Result<Vec<RunRecord>> {
        let regex = Regex::new(&format!("^(?:{pattern})"))?;
        self.read_section(|rows| {
            decode_all(
                rows.iter()
                    .filter(|row| row_name(row).is_some_and(|name| regex.is_match(name))),
            )
        })
    }

    /// Records created within `[first, second]` (inclusive).
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_between_dates(
        &self,
        first: impl AsUnixSeconds,
        second: impl AsUnixSeconds,
    ) -> Result<Vec<RunRecord>> {
        let (low, high) = (first.unix_seconds(), second.unix_seconds());
        self.created_where(|created| low <= created && created <= high)
    }

    /// Records created strictly after `date`.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_greater_than(&self, date: impl AsUnixSeconds) -> Result<Vec<RunRecord>> {
        let bound = date.unix_seconds();
        self.created_where(|created| created > bound)
    }

    /// Records created strictly before `date`.
    ///
    /// # Errors
    ///
    /// Returns IO, corruption or deserialization errors.
    pub fn get_lower_than(&self, date: impl AsUnixSeconds) -> Result<Vec<RunRecord>> {
        let bound = date.unix_seconds();
        self.created_where(|created| created < bound)
    }

    fn created_where(&self, keep: impl Fn(i64) -> bool) -> Result<Vec<RunRecord>> {
        self.read_section(|rows| {
            decode_all(
                rows.iter()
                    .filter(|row| row_created(row).is_some_and(|created| keep(created))),
            )
        })
    }

    // -------------------------------------------------------------------------
    // Critical sections
    // -------------------------------------------------------------------------

    fn skip_read_only(&self, operation: &'static str) -> bool {
        if self.read_only {
            debug!(operation, ledger = %self.path.display(), "Read-only ledger; ignoring write");
        }
        self.read_only
    }

    /// Run `query` over the stored rows under the shared lock.
    ///
    /// A read-only handle whose directory does not exist yet (so no lock
    /// marker can be opened) sees an empty ledger.
    fn read_section<T>(&self, query: impl FnOnce(&[Value]) -> Result<T>) -> Result<T> {
        let _guard = match self.lock.acquire(LockMode::Shared) {
            Ok(guard) => guard,
            Err(e) if self.read_only && e.kind() == io::ErrorKind::NotFound => return query(&[]),
            Err(e) => return Err(e.into()),
        };
        if !self.path.exists() {
            return query(&[]);
        }
        let document = self.load()?;
        query(&document.runs)
    }

    /// Load, mutate and (if `change` reports a modification) store the rows
    /// under the exclusive lock.
    fn write_section<T: Default>(
        &self,
        operation: &'static str,
        change: impl FnOnce(&mut Vec<Value>) -> Result<(T, bool)>,
    ) -> Result<T> {
        if self.skip_read_only(operation) {
            return Ok(T::default());
        }
        let _guard = self.lock.acquire(LockMode::Exclusive)?;
        let mut document = if self.path.exists() {
            self.load()?
        } else {
            LedgerDocument::default()
        };
        let (outcome, modified) = change(&mut document.runs)?;
        if modified {
            self.store(&document)?;
        }
        Ok(outcome)
    }

    fn load(&self) -> Result<LedgerDocument> {
        let text = fs::read_to_string(&self.path)?;
        serde_json::from_str(&text).map_err(|source| Error::StoreCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, document: &LedgerDocument) -> Result<()> {
        let dir = self.parent_dir().unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut staged, document).map_err(io::Error::from)?;
        staged.flush()?;
        if let Ok(metadata) = fs::metadata(&self.path) {
            staged.as_file().set_permissions(metadata.permissions())?;
        }
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        // flush the directory entry written by the rename
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn row_name(row: &Value) -> Option<&str> {
    row.get("name").and_then(Value::as_str)
}

fn row_created(row: &Value) -> Option<i64> {
    row.get("date_created").and_then(Value::as_i64)
}

fn decode_all<'a>(rows: impl Iterator<Item = &'a Value>) -> Result<Vec<RunRecord>> {
    rows.map(schema::from_mapping).collect()
}
