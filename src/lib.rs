//! # Run Ledger: Durable Run Tracking with Code Snapshots
//!
//! **Version**: 0.1.0
//!
//! Run Ledger records experiment runs (name, arguments, metrics, produced
//! artifacts, nested sub-runs) in a single JSON document guarded by a
//! cross-process file lock, and captures an incremental, hardlink-deduplicated
//! snapshot of the source tree for every run.
//!
//! ## Components
//!
//! - [`schema`]: type descriptors and strict mapping conversion for records
//! - [`record`]: the run record model ([`RunRecord`], [`Metric`], [`RunResult`])
//! - [`ledger`]: the file-locked store with id, name and date queries
//! - [`snapshot`]: tree diff plus copy/hardlink snapshot engine
//! - [`context`]: run lifecycle ([`Recorder`], [`RunContext`], duplicate policy)
//! - [`config`]: on-disk layout of a run store
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use run_ledger::{Ledger, RunRecord};
//!
//! let ledger = Ledger::open(".runs/ledger.json")?;
//! ledger.add_new(&[RunRecord::new("run-001", "baseline")])?;
//!
//! for run in ledger.get_by_name_regex("base")? {
//!     println!("{} created {}", run.id(), run.date_created());
//! }
//! # Ok::<(), run_ledger::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod record;
pub mod schema;
pub mod snapshot;

pub use config::Config;
pub use context::{DuplicatePolicy, Metrics, Placement, RecordedRun, Recorder, RunContext};
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerOptions};
pub use record::{Metric, RunRecord, RunRecordBuilder, RunResult};
pub use schema::{Describe, TypeDesc};
pub use snapshot::{SnapshotKind, SnapshotManager, SnapshotReport};
