//! Run Record - one tracked run with its metrics, artifacts and child runs
//!
//! ## Schema Overview
//!
//! ```text
//! RunRecord ──< Metric (N)      [named numeric results]
//!     │
//!     ├──< RunResult (N)        [named artifact paths]
//!     └──< RunRecord (N)        [child runs, serialized inline]
//! ```
//!
//! Timestamps are whole seconds: they are truncated on the way in so that a
//! record read back from the ledger compares equal to the one written.

use std::path::{Path, PathBuf};

use chrono::serde::{ts_seconds, ts_seconds_option};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{Describe, FieldDesc, TypeDesc};

/// Format version written into every new record.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

/// Current time truncated to whole seconds.
#[must_use]
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Anything usable as a point in time for ledger date queries.
pub trait AsUnixSeconds {
    /// Seconds since the Unix epoch.
    fn unix_seconds(&self) -> i64;
}

impl AsUnixSeconds for i64 {
    fn unix_seconds(&self) -> i64 {
        *self
    }
}

impl AsUnixSeconds for DateTime<Utc> {
    fn unix_seconds(&self) -> i64 {
        self.timestamp()
    }
}

/// A named numeric result attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    run_id: String,
    name: String,
    value: f64,
}

impl Metric {
    /// Create a new metric owned by `run_id`.
    #[must_use]
    pub fn new(run_id: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            value,
        }
    }

    /// Get the owning run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }
}

impl Describe for Metric {
    fn describe() -> TypeDesc {
        TypeDesc::record("Metric", || {
            vec![
                FieldDesc::required("run_id", TypeDesc::String),
                FieldDesc::required("name", TypeDesc::String),
                FieldDesc::required("value", TypeDesc::Float),
            ]
        })
    }
}

/// A named pointer to an artifact file produced by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    run_id: String,
    name: String,
    path: PathBuf,
}

impl RunResult {
    /// Create a new result owned by `run_id`.
    #[must_use]
    pub fn new(run_id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            path: path.into(),
        }
    }

    /// Get the owning run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Describe for RunResult {
    fn describe() -> TypeDesc {
        TypeDesc::record("RunResult", || {
            vec![
                FieldDesc::required("run_id", TypeDesc::String),
                FieldDesc::required("name", TypeDesc::String),
                FieldDesc::required("path", TypeDesc::String),
            ]
        })
    }
}

/// Run Record represents a single tracked run.
///
/// Built at run start, mutated while the run executes (metrics and results
/// appended), then persisted once through the [`Ledger`](crate::ledger::Ledger).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    args: String,
    #[serde(with = "ts_seconds")]
    date_created: DateTime<Utc>,
    #[serde(default, with = "ts_seconds_option")]
    date_saved: Option<DateTime<Utc>>,
    local_results_path: PathBuf,
    #[serde(default)]
    local_snapshot_path: PathBuf,
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    results: Vec<RunResult>,
    #[serde(default)]
    other_runs: Vec<RunRecord>,
    #[serde(default = "default_version")]
    version: String,
}

impl RunRecord {
    /// Create a new run record created now, with empty paths and arguments.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        RunRecordBuilder::new(id, name).build()
    }

    /// Create a builder for constructing a run record with optional fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> RunRecordBuilder {
        RunRecordBuilder::new(id, name)
    }

    /// Get the run ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the invocation arguments.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.args
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    /// Get the completion timestamp, if the run has been saved.
    #[must_use]
    pub const fn date_saved(&self) -> Option<DateTime<Utc>> {
        self.date_saved
    }

    /// Get the results directory root.
    #[must_use]
    pub fn local_results_path(&self) -> &Path {
        &self.local_results_path
    }

    /// Get the code snapshot directory.
    #[must_use]
    pub fn local_snapshot_path(&self) -> &Path {
        &self.local_snapshot_path
    }

    /// Get the metrics, in logging order.
    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Get the artifact results, in saving order.
    #[must_use]
    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    /// Get the child runs.
    #[must_use]
    pub fn other_runs(&self) -> &[Self] {
        &self.other_runs
    }

    /// Get the format version tag.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the run has a completion timestamp.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        self.date_saved.is_some()
    }

    /// Look up a child run anywhere below this record (depth-first).
    #[must_use]
    pub fn find_child(&self, id: &str) -> Option<&Self> {
        self.other_runs
            .iter()
            .find_map(|child| if child.id == id { Some(child) } else { child.find_child(id) })
    }

    /// Rename the run.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Replace the description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Replace the invocation arguments.
    pub fn set_args(&mut self, args: impl Into<String>) {
        self.args = args.into();
    }

    /// Point the record at its code snapshot.
    pub fn set_snapshot_path(&mut self, path: impl Into<PathBuf>) {
        self.local_snapshot_path = path.into();
    }

    /// Append a metric owned by this run.
    pub fn log_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push(Metric::new(self.id.clone(), name, value));
    }

    /// Append an artifact result owned by this run.
    pub fn add_result(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.results.push(RunResult::new(self.id.clone(), name, path));
    }

    /// Nest a child run under this record.
    pub fn add_child(&mut self, child: Self) {
        self.other_runs.push(child);
    }

    /// Set the completion timestamp (truncated to whole seconds).
    pub fn mark_saved(&mut self, at: DateTime<Utc>) {
        self.date_saved = Some(at.trunc_subsecs(0));
    }
}

impl Describe for RunRecord {
    fn describe() -> TypeDesc {
        TypeDesc::record("RunRecord", || {
            vec![
                FieldDesc::required("id", TypeDesc::String),
                FieldDesc::required("name", TypeDesc::String),
                FieldDesc::defaulted("description", TypeDesc::String),
                FieldDesc::required("args", TypeDesc::String),
                FieldDesc::required("date_created", TypeDesc::Integer),
                FieldDesc::required("date_saved", TypeDesc::Optional(Box::new(TypeDesc::Integer))),
                FieldDesc::required("local_results_path", TypeDesc::String),
                FieldDesc::defaulted("local_snapshot_path", TypeDesc::String),
                FieldDesc::defaulted("metrics", TypeDesc::of::<Vec<Metric>>()),
                FieldDesc::defaulted("results", TypeDesc::of::<Vec<RunResult>>()),
                FieldDesc::defaulted("other_runs", TypeDesc::of::<Vec<Self>>()),
                FieldDesc::defaulted("version", TypeDesc::String),
            ]
        })
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    id: String,
    name: String,
    description: String,
    args: String,
    date_created: DateTime<Utc>,
    local_results_path: PathBuf,
    local_snapshot_path: PathBuf,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            args: String::new(),
            date_created: now_seconds(),
            local_results_path: PathBuf::new(),
            local_snapshot_path: PathBuf::new(),
        }
    }

    /// Set the free-text description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the invocation arguments.
    #[must_use]
    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    /// Set a custom creation timestamp (useful for imports and testing).
    #[must_use]
    pub fn date_created(mut self, at: DateTime<Utc>) -> Self {
        self.date_created = at.trunc_subsecs(0);
        self
    }

    /// Set the results directory root.
    #[must_use]
    pub fn local_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_results_path = path.into();
        self
    }

    /// Set the code snapshot directory.
    #[must_use]
    pub fn local_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_snapshot_path = path.into();
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        RunRecord {
            id: self.id,
            name: self.name,
            description: self.description,
            args: self.args,
            date_created: self.date_created,
            date_saved: None,
            local_results_path: self.local_results_path,
            local_snapshot_path: self.local_snapshot_path,
            metrics: Vec::new(),
            results: Vec::new(),
            other_runs: Vec::new(),
            version: default_version(),
        }
    }
}
