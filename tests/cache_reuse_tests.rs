//! Cross-run materialization reuse through the session driver.

mod common;

use common::{shared_filter_plan, RecordingAdapter};
use planwise_core::cache::CacheHint;
use planwise_core::config::OptimizerConfig;
use planwise_core::dag::PhysicalOp;
use planwise_core::id::HandleId;
use planwise_core::stats::DatasetStats;
use planwise_exec::Session;

/// `events` and `sessions` both scan to 1 MB; the shared filter keeps
/// half, so each materialized result is estimated at 500 KB.
fn session(budget: u64) -> Session {
    let s = Session::new(OptimizerConfig {
        cache_budget_bytes: budget,
        ..Default::default()
    })
    .expect("valid config");
    s.stats()
        .register("events", DatasetStats::new(10_000, 1_000_000));
    s.stats()
        .register("sessions", DatasetStats::new(10_000, 1_000_000));
    s
}

#[test]
fn test_shared_subtree_materialized_then_reused() {
    let s = session(1 << 30);
    let plan = shared_filter_plan("events");
    let mut adapter = RecordingAdapter::default();

    let physical = s.optimize(&plan).unwrap();
    let targets = physical.materialization_targets();
    assert_eq!(targets.len(), 1);
    assert!(matches!(
        physical.nodes[targets[0].0.index()].cache_hint,
        Some(CacheHint::Materialize {
            reuse_count: 2,
            estimated_bytes: 500_000,
            ..
        })
    ));
    s.release(&physical);

    let first = s.run(&plan, &mut adapter).unwrap();
    assert_eq!(first.admitted, 1);
    assert_eq!(s.cache().used_bytes(), 500_000);

    let second = s.run(&plan, &mut adapter).unwrap();
    assert_eq!(second.reused, 2);
    assert_eq!(second.admitted, 0);

    // Both occurrences read the same handle; pins were dropped afterwards.
    let physical = s.optimize(&plan).unwrap();
    let reads: Vec<HandleId> = physical
        .nodes
        .iter()
        .filter_map(|n| match n.op {
            PhysicalOp::CachedRead { handle, .. } => Some(handle),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![HandleId::new(1), HandleId::new(1)]);
    assert_eq!(s.cache().peek(&targets[0].1).unwrap().reference_count, 2);
    s.release(&physical);
    assert_eq!(s.cache().pinned_bytes(), 0);
}

#[test]
fn test_dataset_modification_invalidates_reuse() {
    let s = session(1 << 30);
    let plan = shared_filter_plan("events");
    let mut adapter = RecordingAdapter::default();

    s.run(&plan, &mut adapter).unwrap();
    assert_eq!(s.stats().mark_modified("events").unwrap(), 2);

    let after = s.run(&plan, &mut adapter).unwrap();
    assert_eq!(after.reused, 0);
    assert_eq!(after.admitted, 1);
    // The stale entry stays resident until budget pressure evicts it.
    assert_eq!(s.cache().len(), 2);
}

#[test]
fn test_oversized_result_degrades_to_uncached() {
    let s = session(1_000_000);
    let plan = shared_filter_plan("events");
    // The real result is four times the estimate and cannot fit.
    let mut adapter = RecordingAdapter {
        size_factor: 4,
        ..Default::default()
    };

    let summary = s.run(&plan, &mut adapter).unwrap();
    assert_eq!(summary.admitted, 0);
    assert_eq!(summary.rejected, 1);
    assert_eq!(adapter.discarded, vec![HandleId::new(1)]);
    assert!(s.cache().is_empty());
    assert_eq!(s.cache().stats().rejections, 1);
}

#[test]
fn test_budget_pressure_evicts_least_recent_result() {
    let s = session(600_000);
    let mut adapter = RecordingAdapter::default();

    let first = s.run(&shared_filter_plan("events"), &mut adapter).unwrap();
    assert_eq!(first.admitted, 1);

    let second = s.run(&shared_filter_plan("sessions"), &mut adapter).unwrap();
    assert_eq!(second.admitted, 1);
    assert_eq!(second.evicted, vec![HandleId::new(1)]);
    assert_eq!(adapter.discarded, vec![HandleId::new(1)]);
    assert_eq!(s.cache().len(), 1);
    assert_eq!(s.cache().used_bytes(), 500_000);

    // The evicted events result is recomputed and materialized again.
    let third = s.run(&shared_filter_plan("events"), &mut adapter).unwrap();
    assert_eq!(third.reused, 0);
    assert_eq!(third.admitted, 1);
}

#[test]
fn test_failed_execution_releases_every_pin() {
    let s = session(1 << 30);
    let plan = shared_filter_plan("events");
    let mut adapter = RecordingAdapter::default();
    s.run(&plan, &mut adapter).unwrap();

    adapter.fail = true;
    assert!(s.run(&plan, &mut adapter).is_err());
    assert_eq!(adapter.executions, 2);
    assert_eq!(s.cache().pinned_bytes(), 0);
    assert!(s.cache().entries().iter().all(|e| e.reference_count == 0));
}

#[test]
fn test_min_reuse_count_gates_materialization() {
    let s = Session::new(OptimizerConfig {
        min_reuse_count_for_cache: 3,
        ..Default::default()
    })
    .unwrap();
    s.stats()
        .register("events", DatasetStats::new(10_000, 1_000_000));
    let physical = s.optimize(&shared_filter_plan("events")).unwrap();
    assert!(physical.nodes.iter().all(|n| n.cache_hint.is_none()));
}
