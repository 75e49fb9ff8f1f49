//! Run context and recorder - drives a run from creation to persistence
//!
//! A [`Recorder`] creates a [`RunContext`] for each run and hands it to user
//! code by `&mut` reference; there is no ambient "current run". When the user
//! code returns, the recorder appends the returned metrics, snapshots the
//! source tree, stamps the completion time and writes the record to the
//! ledger.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use run_ledger::config::Config;
//! use run_ledger::context::{DuplicatePolicy, Metrics, Recorder};
//!
//! let recorder = Recorder::new(Config::default()).policy(DuplicatePolicy::AsNewEntry);
//! let run = recorder.run("logreg-baseline", |ctx| {
//!     ctx.save_json("predictions", &vec![0, 1, 1], false)?;
//!     Ok::<_, run_ledger::Error>(Metrics::from([("f1".to_string(), 0.87)]))
//! })?;
//! println!("stored run {}", run.record.id());
//! # Ok::<(), run_ledger::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::record::{now_seconds, RunRecord};
use crate::snapshot::{SnapshotManager, SnapshotReport};
use crate::{Error, Result};

/// Metrics returned by user code, keyed by name.
pub type Metrics = BTreeMap<String, f64>;

/// What to do when a new run's name is already in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail with [`Error::DuplicateName`]
    #[default]
    Disallow,
    /// Store the run inside an existing run's `other_runs`.
    ///
    /// `parent_id` picks the parent among the same-named runs; when absent
    /// or not among them, the most recently created one is used.
    AsSubEntry {
        /// Preferred parent run id
        parent_id: Option<String>,
    },
    /// Store a separate top-level run with the same name
    AsNewEntry,
}

/// Where a run will be stored, decided once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Its own ledger row
    TopLevel,
    /// Nested under the run with this id
    ChildOf(String),
}

impl DuplicatePolicy {
    /// Decide the placement of a run called `name`, given the runs already
    /// stored under that exact name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] for [`DuplicatePolicy::Disallow`]
    /// when `existing` is not empty.
    pub fn resolve(&self, name: &str, existing: &[RunRecord]) -> Result<Placement> {
        match self {
            Self::AsNewEntry => Ok(Placement::TopLevel),
            Self::Disallow if existing.is_empty() => Ok(Placement::TopLevel),
            Self::Disallow => Err(Error::DuplicateName(format!(
                "{} run(s) named `{name}` already exist; pick another name or a different duplicate policy",
                existing.len()
            ))),
            Self::AsSubEntry { parent_id } => {
                let requested = parent_id
                    .as_deref()
                    .and_then(|id| existing.iter().find(|run| run.id() == id));
                if let Some(parent) = requested {
                    return Ok(Placement::ChildOf(parent.id().to_string()));
                }
                let Some(latest) = existing.iter().max_by_key(|run| run.date_created()) else {
                    return Ok(Placement::TopLevel);
                };
                if parent_id.is_some() || existing.len() > 1 {
                    warn!(
                        name,
                        requested_parent = parent_id.as_deref().unwrap_or(""),
                        chosen_parent = latest.id(),
                        "No valid parent id given; nesting under the most recent run"
                    );
                }
                Ok(Placement::ChildOf(latest.id().to_string()))
            }
        }
    }
}

/// Handle on the run in progress, passed to user code.
#[derive(Debug)]
pub struct RunContext {
    record: RunRecord,
    placement: Placement,
    ledger: Ledger,
    snapshots: SnapshotManager,
    results_dir: PathBuf,
    saved_counter: usize,
}

impl RunContext {
    /// Start a run called `name` with a fresh UUID.
    ///
    /// # Errors
    ///
    /// See [`RunContext::start_with_id`].
    pub fn start(config: &Config, name: &str, policy: &DuplicatePolicy) -> Result<Self> {
        Self::start_with_id(config, Uuid::new_v4().to_string(), name, policy)
    }

    /// Start a run with a caller-supplied unique `id`.
    ///
    /// Resolves the duplicate-name policy against the ledger and creates the
    /// run's results directory `<results_root>/<id>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] when the policy forbids the name, or
    /// ledger and IO errors.
    pub fn start_with_id(
        config: &Config,
        id: impl Into<String>,
        name: &str,
        policy: &DuplicatePolicy,
    ) -> Result<Self> {
        let ledger = config.open_ledger()?;
        let existing = ledger.get_all_by_exact_name(name)?;
        let placement = policy.resolve(name, &existing)?;

        let id = id.into();
        let snapshots = config.snapshot_manager(&id);
        let record = RunRecord::builder(id, name)
            .args(std::env::args().collect::<Vec<_>>().join(" "))
            .local_results_path(config.results_root())
            .local_snapshot_path(snapshots.destination())
            .build();
        let results_dir = config.results_root().join(record.id());
        fs::create_dir_all(&results_dir)?;

        info!(run_id = record.id(), name, placement = ?placement, "Run started");
        Ok(Self {
            record,
            placement,
            ledger,
            snapshots,
            results_dir,
            saved_counter: 0,
        })
    }

    /// Set the run description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.record.set_description(description);
        self
    }

    /// Override the recorded invocation arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.record.set_args(args);
        self
    }

    /// The record being built.
    #[must_use]
    pub const fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Where the run will be stored.
    #[must_use]
    pub const fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Directory this run's artifacts are written to.
    #[must_use]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Record a metric.
    pub fn log_metric(&mut self, name: impl Into<String>, value: f64) {
        self.record.log_metric(name, value);
    }

    /// Save `value` as a pretty-printed JSON artifact `<name>.json`.
    ///
    /// # Errors
    ///
    /// See [`RunContext::save_with`].
    pub fn save_json<T: Serialize>(
        &mut self,
        name: &str,
        value: &T,
        allow_existing: bool,
    ) -> Result<PathBuf> {
        self.save_with(name, "json", allow_existing, |file| {
            serde_json::to_writer_pretty(file, value).map_err(io::Error::from)
        })
    }

    /// Save an artifact `<name>.<extension>` written by `write`, and record it
    /// as a run result.
    ///
    /// If the name is taken and `allow_existing` is set, a counter suffix
    /// (`<name>_1`, `<name>_2`, ...) is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] when the name is taken and
    /// `allow_existing` is false, or IO errors from `write`.
    pub fn save_with(
        &mut self,
        name: &str,
        extension: &str,
        allow_existing: bool,
        write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    ) -> Result<PathBuf> {
        let path = self.artifact_path(name, extension, allow_existing)?;
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        self.record.add_result(name, &path);
        Ok(path)
    }

    fn artifact_path(&mut self, name: &str, extension: &str, allow_existing: bool) -> Result<PathBuf> {
        let file_name = |stem: &str| {
            if extension.is_empty() {
                stem.to_string()
            } else {
                format!("{stem}.{}", extension.trim_start_matches('.'))
            }
        };
        let path = self.results_dir.join(file_name(name));
        if !path.exists() {
            return Ok(path);
        }
        if !allow_existing {
            return Err(Error::DuplicateName(format!(
                "artifact {} already exists; pass allow_existing or choose another name",
                path.display()
            )));
        }
        loop {
            self.saved_counter += 1;
            let candidate = self
                .results_dir
                .join(file_name(&format!("{name}_{}", self.saved_counter)));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    /// Snapshot the source, stamp the completion time and write the record.
    ///
    /// # Errors
    ///
    /// Returns snapshot, ledger or IO errors. A failed snapshot leaves the
    /// ledger untouched.
    pub fn finish(mut self) -> Result<(RunRecord, SnapshotReport)> {
        let snapshot = self.snapshots.make_snapshot()?;
        self.record.set_snapshot_path(&snapshot.destination);
        self.record.mark_saved(now_seconds());

        let stored = match &self.placement {
            Placement::TopLevel => false,
            Placement::ChildOf(parent_id) => {
                let child = self.record.clone();
                self.ledger.modify(parent_id, |parent| parent.add_child(child))?
            }
        };
        if !stored {
            if let Placement::ChildOf(parent_id) = &self.placement {
                warn!(
                    run_id = self.record.id(),
                    parent_id = parent_id.as_str(),
                    "Parent run disappeared; storing as a top-level run"
                );
            }
            self.ledger.add_new(std::slice::from_ref(&self.record))?;
        }

        info!(
            run_id = self.record.id(),
            metrics = self.record.metrics().len(),
            results = self.record.results().len(),
            "Run saved"
        );
        Ok((self.record, snapshot))
    }
}

/// A run persisted by [`Recorder::run`].
#[derive(Debug, Clone)]
pub struct RecordedRun {
    /// Metrics returned by the user code
    pub metrics: Metrics,
    /// The record as written to the ledger
    pub record: RunRecord,
    /// Snapshot taken for the run
    pub snapshot: SnapshotReport,
}

/// Records runs against one configuration.
#[derive(Debug, Clone)]
pub struct Recorder {
    config: Config,
    policy: DuplicatePolicy,
    save_on_error: bool,
    description: Option<String>,
    args: Option<String>,
}

impl Recorder {
    /// Recorder with [`DuplicatePolicy::Disallow`] that only saves
    /// successful runs.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            policy: DuplicatePolicy::Disallow,
            save_on_error: false,
            description: None,
            args: None,
        }
    }

    /// Set the duplicate-name policy.
    #[must_use]
    pub fn policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Also snapshot and persist runs whose user code failed.
    #[must_use]
    pub const fn save_on_error(mut self, save: bool) -> Self {
        self.save_on_error = save;
        self
    }

    /// Description attached to every recorded run.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Invocation arguments recorded instead of the process arguments.
    #[must_use]
    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run `body` as a tracked run called `name`.
    ///
    /// # Errors
    ///
    /// Returns the error of `body` (after persisting the run when
    /// `save_on_error` is set), or tracking errors converted into `E`.
    pub fn run<F, E>(&self, name: &str, body: F) -> std::result::Result<RecordedRun, E>
    where
        F: FnOnce(&mut RunContext) -> std::result::Result<Metrics, E>,
        E: From<Error>,
    {
        let mut context = RunContext::start(&self.config, name, &self.policy)?;
        if let Some(description) = &self.description {
            context = context.with_description(description.clone());
        }
        if let Some(args) = &self.args {
            context = context.with_args(args.clone());
        }

        match body(&mut context) {
            Ok(metrics) => {
                for (metric, value) in &metrics {
                    context.log_metric(metric.clone(), *value);
                }
                let (record, snapshot) = context.finish()?;
                Ok(RecordedRun {
                    metrics,
                    record,
                    snapshot,
                })
            }
            Err(err) => {
                if self.save_on_error {
                    let run_id = context.record().id().to_string();
                    match context.finish() {
                        Ok(_) => info!(run_id = run_id.as_str(), "Saved failed run"),
                        Err(save_err) => warn!(
                            run_id = run_id.as_str(),
                            error = %save_err,
                            "Could not save failed run"
                        ),
                    }
                }
                Err(err)
            }
        }
    }
}
