//! Property-based tests for run-ledger
//!
//! - Records survive the mapping conversion and the ledger unchanged
//! - Date queries partition the ledger around any bound
//! - Name queries are prefix matches
//!
//! Run with `ProptestConfig::with_cases` kept small: every ledger case
//! touches the filesystem.

use chrono::DateTime;
use proptest::prelude::*;
use run_ledger::schema::{from_mapping, to_mapping};
use run_ledger::{Ledger, RunRecord};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Finite metric values; NaN never compares equal to itself.
fn arb_value() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e9_f64..1.0e9, Just(0.0), Just(1.0e-7)]
}

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(-[a-z0-9]{1,4})?"
}

prop_compose! {
    fn arb_leaf(id: String)(
        name in arb_name(),
        description in ".{0,20}",
        created in 0_i64..4_000_000_000,
        saved in proptest::option::of(0_i64..4_000_000_000),
        metrics in proptest::collection::vec(("[a-z]{1,8}", arb_value()), 0..4),
        results in proptest::collection::vec(("[a-z]{1,8}", "/[a-z/]{1,16}"), 0..3),
    ) -> RunRecord {
        let mut run = RunRecord::builder(id.clone(), name)
            .description(description)
            .args("train --seed 1")
            .date_created(DateTime::from_timestamp(created, 0).unwrap())
            .local_results_path("/results")
            .build();
        for (metric, value) in metrics {
            run.log_metric(metric, value);
        }
        for (result, path) in results {
            run.add_result(result, path);
        }
        if let Some(saved) = saved {
            run.mark_saved(DateTime::from_timestamp(saved, 0).unwrap());
        }
        run
    }
}

/// A run with up to two levels of nested child runs.
fn arb_run(id: usize) -> impl Strategy<Value = RunRecord> {
    let children = proptest::collection::vec(0_usize..3, 0..3);
    (arb_leaf(format!("run-{id}")), children).prop_flat_map(move |(parent, grand)| {
        let kids: Vec<_> = grand
            .iter()
            .enumerate()
            .map(|(i, grandkids)| {
                let child_id = format!("run-{id}.{i}");
                let leaves: Vec<_> = (0..*grandkids)
                    .map(|j| arb_leaf(format!("{child_id}.{j}")))
                    .collect();
                (arb_leaf(child_id), leaves).prop_map(|(mut child, leaves)| {
                    for leaf in leaves {
                        child.add_child(leaf);
                    }
                    child
                })
            })
            .collect();
        (Just(parent), kids).prop_map(|(mut parent, kids)| {
            for kid in kids {
                parent.add_child(kid);
            }
            parent
        })
    })
}

fn arb_ledger_rows() -> impl Strategy<Value = Vec<RunRecord>> {
    proptest::collection::vec((arb_name(), 0_i64..1_000), 0..12).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (name, created))| {
                RunRecord::builder(format!("id-{i}"), name)
                    .date_created(DateTime::from_timestamp(created, 0).unwrap())
                    .build()
            })
            .collect()
    })
}

fn ids(runs: &[RunRecord]) -> Vec<String> {
    runs.iter().map(|r| r.id().to_string()).collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: mapping conversion is lossless for nested records
    #[test]
    fn prop_mapping_round_trip(run in arb_run(0)) {
        let mapping = to_mapping(&run).unwrap();
        let back: RunRecord = from_mapping(&mapping).unwrap();
        prop_assert_eq!(back, run);
    }

    /// Property: whatever is added can be read back by id
    #[test]
    fn prop_ledger_add_then_get(runs in proptest::collection::vec(arb_run(1), 1..2)) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).unwrap();
        ledger.add_new(&runs).unwrap();
        for run in &runs {
            let stored = ledger.get_by_id(run.id()).unwrap();
            prop_assert_eq!(stored.as_ref(), Some(run));
        }
    }

    /// Property: lower-than and greater-or-equal partition the ledger
    #[test]
    fn prop_date_queries_partition(rows in arb_ledger_rows(), bound in 0_i64..1_000) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).unwrap();
        ledger.add_new(&rows).unwrap();

        let below = ledger.get_lower_than(bound).unwrap();
        let from = ledger.get_between_dates(bound, i64::MAX).unwrap();
        let above = ledger.get_greater_than(bound).unwrap();

        prop_assert_eq!(below.len() + from.len(), rows.len());
        prop_assert!(above.len() <= from.len());
        prop_assert!(below.iter().all(|r| r.date_created().timestamp() < bound));
        prop_assert!(above.iter().all(|r| r.date_created().timestamp() > bound));
    }

    /// Property: literal and regex name queries both behave as prefix matches
    #[test]
    fn prop_name_queries_match_predicates(rows in arb_ledger_rows(), needle in "[a-z]{1,2}") {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).unwrap();
        ledger.add_new(&rows).unwrap();

        let prefixed: Vec<String> = rows
            .iter()
            .filter(|r| r.name().starts_with(needle.as_str()))
            .map(|r| r.id().to_string())
            .collect();

        prop_assert_eq!(ids(&ledger.get_by_name_contains(&needle).unwrap()), prefixed.clone());
        prop_assert_eq!(ids(&ledger.get_by_name_regex(&needle).unwrap()), prefixed);
    }
}
