//! Run Tracking Example
//!
//! Records a few training runs in a scratch project: metrics, a JSON
//! artifact, incremental code snapshots and a nested retry run, then queries
//! the ledger.
//!
//! Run with: cargo run --example run_tracking

use std::fs;

use anyhow::Context;
use run_ledger::{Config, DuplicatePolicy, Metrics, Recorder};

fn main() -> anyhow::Result<()> {
    run_ledger::logging::init();
    println!("=== Run Ledger: Run Tracking ===\n");

    let project = tempfile::tempdir().context("creating scratch project")?;
    fs::write(project.path().join("train.py"), "lr = 0.1\n")?;
    fs::write(project.path().join(".gitignore"), "*.log\n")?;
    fs::write(project.path().join("debug.log"), "not snapshotted\n")?;
    let config = Config::default_in(project.path());

    // -------------------------------------------------------------------------
    // 1. A first run with metrics and an artifact
    // -------------------------------------------------------------------------
    println!("1. Recording baseline run...");

    let recorder = Recorder::new(config.clone())
        .description("logistic regression baseline")
        .policy(DuplicatePolicy::AsNewEntry);
    let baseline = recorder.run("logreg", |ctx| {
        for epoch in 0..5_i32 {
            ctx.log_metric(format!("loss_epoch_{epoch}"), 1.0 / f64::from(epoch + 1));
        }
        ctx.save_json("weights", &[0.4, -1.2, 3.3], false)?;
        Ok::<_, run_ledger::Error>(Metrics::from([("f1".to_string(), 0.81)]))
    })?;

    println!("   Run ID: {}", baseline.record.id());
    println!("   Metrics: {}", baseline.record.metrics().len());
    println!(
        "   Snapshot: {} ({:?}, {} copied)",
        baseline.snapshot.destination.display(),
        baseline.snapshot.kind,
        baseline.snapshot.copied
    );

    // -------------------------------------------------------------------------
    // 2. A second run after a code change: only train.py is copied
    // -------------------------------------------------------------------------
    println!("\n2. Recording tuned run...");

    fs::write(project.path().join("train.py"), "lr = 0.01\n")?;
    fs::write(project.path().join("features.py"), "COLUMNS = 12\n")?;
    let tuned = recorder.run("logreg", |_| {
        Ok::<_, run_ledger::Error>(Metrics::from([("f1".to_string(), 0.86)]))
    })?;
    println!(
        "   Snapshot: {:?}, {} copied, {} hardlinked",
        tuned.snapshot.kind, tuned.snapshot.copied, tuned.snapshot.linked
    );

    // -------------------------------------------------------------------------
    // 3. A retry nested under the tuned run
    // -------------------------------------------------------------------------
    println!("\n3. Recording a retry as a sub-run...");

    let retry = Recorder::new(config.clone())
        .policy(DuplicatePolicy::AsSubEntry {
            parent_id: Some(tuned.record.id().to_string()),
        })
        .run("logreg", |_| {
            Ok::<_, run_ledger::Error>(Metrics::from([("f1".to_string(), 0.87)]))
        })?;
    println!("   Retry {} nested under {}", retry.record.id(), tuned.record.id());

    // -------------------------------------------------------------------------
    // 4. Query the ledger
    // -------------------------------------------------------------------------
    println!("\n4. Querying...");

    let ledger = config.open_ledger_read_only()?;
    for run in ledger.get_by_name_regex("log")? {
        let f1 = run
            .metrics()
            .iter()
            .find(|m| m.name() == "f1")
            .map_or(f64::NAN, |m| m.value());
        println!(
            "   {} {} f1={f1:.2} children={}",
            run.date_created(),
            run.id(),
            run.other_runs().len()
        );
    }

    println!("\n=== Done ===");
    Ok(())
}
