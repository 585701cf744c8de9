//! Observed sizes flowing back into later plans.

mod common;

use common::{find, register_scenario_stats, scenario_plan, shared_filter_plan, RecordingAdapter};
use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{BuildSide, JoinStrategy, PhysicalOp};
use planwise_core::stats::{DatasetStats, StatisticsSource};
use planwise_exec::Session;
use planwise_stats::{StatisticsProvider, StatsCatalog};

fn join_strategy(session: &Session) -> JoinStrategy {
    let physical = session.optimize(&scenario_plan()).expect("scenario optimizes");
    session.release(&physical);
    match find(&physical, "Join").op {
        PhysicalOp::Join { strategy, .. } => strategy,
        _ => unreachable!(),
    }
}

#[test]
fn test_observed_growth_flips_join_strategy() {
    let session = Session::new(OptimizerConfig::default()).unwrap();
    register_scenario_stats(session.stats());
    assert_eq!(
        join_strategy(&session),
        JoinStrategy::Broadcast {
            side: BuildSide::Right
        }
    );

    // users turned out to be 40 MB, not 50 KB.
    let mut adapter = RecordingAdapter {
        observations: vec![("users".into(), DatasetStats::new(400_000, 40_000_000))],
        ..Default::default()
    };
    let summary = session.run(&scenario_plan(), &mut adapter).unwrap();
    assert_eq!(summary.observed, vec!["users".to_string()]);

    let users = session.stats().estimate("users").unwrap();
    assert_eq!(users.row_count_estimate, 200_500);
    assert_eq!(users.byte_size_estimate, 20_025_000);
    assert_eq!(join_strategy(&session), JoinStrategy::ShuffleHash);
}

#[test]
fn test_repeated_observations_converge() {
    let provider = StatisticsProvider::new();
    provider.register("events", DatasetStats::new(1_000, 1_600_000));
    let observed = DatasetStats::new(1_000, 100_000);

    let mut last = provider.estimate("events").unwrap().byte_size_estimate;
    for _ in 0..8 {
        let next = provider.record_observation("events", &observed).byte_size_estimate;
        assert!(next < last);
        assert!(next >= observed.byte_size_estimate);
        last = next;
    }
    // The gap to the observation halves on every run.
    assert_eq!(last, 105_860);
    assert_eq!(provider.observation_count("events").unwrap(), 8);
}

#[test]
fn test_observations_keep_cached_results_valid() {
    let session = Session::new(OptimizerConfig::default()).unwrap();
    session
        .stats()
        .register("events", DatasetStats::new(10_000, 1_000_000));
    let plan = shared_filter_plan("events");

    let mut adapter = RecordingAdapter {
        observations: vec![("events".into(), DatasetStats::new(12_000, 1_200_000))],
        ..Default::default()
    };
    session.run(&plan, &mut adapter).unwrap();
    assert_eq!(session.stats().dataset_version("events").unwrap(), 1);

    // Estimates moved, the data version did not: the entry still matches.
    let again = session.run(&plan, &mut adapter).unwrap();
    assert_eq!(again.reused, 2);
}

#[test]
fn test_learned_statistics_survive_catalog_round_trip() {
    let provider = StatisticsProvider::new();
    register_scenario_stats(&provider);
    provider.record_observation("users", &DatasetStats::new(3_000, 150_000));

    let yaml = provider.snapshot().to_yaml_string().unwrap();
    let restored = StatisticsProvider::from_catalog(&StatsCatalog::from_yaml_str(&yaml).unwrap());
    assert_eq!(restored.datasets(), vec!["transactions", "users"]);

    let users = restored.estimate("users").unwrap();
    assert_eq!(users.row_count_estimate, 2_000);
    assert_eq!(users.byte_size_estimate, 100_000);
    assert_eq!(users.distinct_key_counts.get("gender"), Some(&3));
}
