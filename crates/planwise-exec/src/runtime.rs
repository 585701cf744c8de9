//! Session: optimize → execute → feed back, with cache pins always released.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use planwise_cache::CacheManager;
use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{LogicalPlan, PhysicalPlan};
use planwise_core::hash::Hash256;
use planwise_core::id::HandleId;
use planwise_planner::{optimize, plan_digest, JoinStrategySelector, PartitionAdvisor};
use planwise_stats::StatisticsProvider;

use crate::adapter::{AdapterError, ExecutionAdapter, ExecutionReport};
use crate::metrics;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Plan(#[from] planwise_core::Error),

    #[error("cache: {0}")]
    Cache(#[from] planwise_cache::Error),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Outcome of one `Session::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// planwise version that produced the plan.
    pub planner_version: String,
    /// Digest of the physical plan that was executed.
    pub plan_hash: Hash256,
    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
    pub optimize_micros: u64,
    /// Subtrees served from the cache.
    pub reused: usize,
    /// Materialized results admitted to the cache.
    pub admitted: usize,
    /// Materialized results the cache could not hold; the run degraded to
    /// uncached execution for them.
    pub rejected: usize,
    /// Handles evicted to make room for admissions.
    pub evicted: Vec<HandleId>,
    /// Datasets whose statistics were updated from observations.
    pub observed: Vec<String>,
}

/// Long-lived optimizer context shared by consecutive runs.
pub struct Session {
    config: OptimizerConfig,
    stats: Arc<StatisticsProvider>,
    cache: Arc<CacheManager>,
    advisor: PartitionAdvisor,
    selector: JoinStrategySelector,
}

impl Session {
    /// Fresh provider and a cache sized by `config.cache_budget_bytes`.
    pub fn new(config: OptimizerConfig) -> Result<Self, ExecError> {
        let cache = Arc::new(CacheManager::from_config(&config));
        Self::with_components(config, Arc::new(StatisticsProvider::new()), cache)
    }

    pub fn with_components(
        config: OptimizerConfig,
        stats: Arc<StatisticsProvider>,
        cache: Arc<CacheManager>,
    ) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self {
            advisor: PartitionAdvisor::from_config(&config),
            selector: JoinStrategySelector::new(),
            config,
            stats,
            cache,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StatisticsProvider> {
        &self.stats
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Optimize without executing. Cache hits in the result are pinned;
    /// pass the plan to `release` when done with it.
    pub fn optimize(&self, plan: &LogicalPlan) -> Result<PhysicalPlan, ExecError> {
        Ok(optimize(
            plan,
            self.stats.as_ref(),
            self.cache.as_ref(),
            &self.advisor,
            &self.selector,
            &self.config,
        )?)
    }

    /// Drop every pin held by `plan`. Failures are logged, not returned:
    /// an entry may legitimately have been evicted manually in between.
    pub fn release(&self, plan: &PhysicalPlan) {
        for fp in plan.pinned_fingerprints() {
            if let Err(e) = self.cache.release(&fp) {
                tracing::warn!(fingerprint = %fp.short(), error = %e, "cache release failed");
            }
        }
    }

    /// Optimize and execute `plan`, then admit materialized results, record
    /// observed statistics, and release every pin. Pins are released even
    /// when execution fails.
    pub fn run<A: ExecutionAdapter + ?Sized>(
        &self,
        plan: &LogicalPlan,
        adapter: &mut A,
    ) -> Result<RunSummary, ExecError> {
        let started_ms = now_ms();
        let t0 = Instant::now();
        let physical = self.optimize(plan)?;
        let optimize_micros = t0.elapsed().as_micros() as u64;

        let plan_hash = match plan_digest(&physical) {
            Ok(h) => h,
            Err(e) => {
                self.release(&physical);
                return Err(e.into());
            }
        };

        let outcome = adapter.execute(&physical);
        self.release(&physical);
        let report = outcome?;

        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            planner_version: planwise_core::VERSION.to_string(),
            plan_hash,
            started_ms,
            finished_ms: started_ms,
            optimize_micros,
            reused: physical.pinned_fingerprints().len(),
            admitted: 0,
            rejected: 0,
            evicted: Vec::new(),
            observed: Vec::new(),
        };
        self.absorb(report, adapter, &mut summary)?;
        summary.finished_ms = now_ms();

        metrics::emit(
            "session_run",
            &[
                ("plan_hash", plan_hash.to_hex()),
                ("reused", summary.reused.to_string()),
                ("admitted", summary.admitted.to_string()),
                ("rejected", summary.rejected.to_string()),
                ("evicted", summary.evicted.len().to_string()),
                ("optimize_micros", optimize_micros.to_string()),
            ],
        );
        tracing::info!(
            run_id = %summary.run_id,
            reused = summary.reused,
            admitted = summary.admitted,
            rejected = summary.rejected,
            "run finished"
        );
        Ok(summary)
    }

    fn absorb<A: ExecutionAdapter + ?Sized>(
        &self,
        report: ExecutionReport,
        adapter: &mut A,
        summary: &mut RunSummary,
    ) -> Result<(), ExecError> {
        let mut dropped: Vec<HandleId> = Vec::new();
        for out in report.materialized {
            match self.cache.admit(out.fingerprint, out.handle, out.size_bytes) {
                Ok(evicted) => {
                    summary.admitted += 1;
                    dropped.extend(evicted.iter().map(|e| e.materialized_handle));
                    summary
                        .evicted
                        .extend(evicted.into_iter().map(|e| e.materialized_handle));
                }
                Err(planwise_cache::Error::BudgetExceeded {
                    requested,
                    capacity,
                    pinned,
                    ..
                }) => {
                    tracing::warn!(
                        fingerprint = %out.fingerprint.short(),
                        requested,
                        capacity,
                        pinned,
                        "cache full of pinned entries; continuing uncached (degraded)"
                    );
                    summary.rejected += 1;
                    dropped.push(out.handle);
                }
                Err(e) => {
                    if !dropped.is_empty() {
                        adapter.discard(&dropped);
                    }
                    return Err(e.into());
                }
            }
        }
        if !dropped.is_empty() {
            adapter.discard(&dropped);
        }

        for (dataset, observed) in report.observed {
            self.stats.record_observation(&dataset, &observed);
            summary.observed.push(dataset);
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_core::cache::CacheHint;
    use planwise_core::dag::{Aggregation, JoinType, LogicalPlanBuilder, Predicate};
    use planwise_core::stats::{DatasetStats, StatisticsSource};

    use crate::adapter::MaterializedOutput;

    /// Materializes every `Materialize` hint at its estimated size.
    #[derive(Default)]
    struct EchoAdapter {
        next_handle: u64,
        executed: usize,
        discarded: Vec<HandleId>,
        fail: bool,
    }

    impl ExecutionAdapter for EchoAdapter {
        fn execute(&mut self, plan: &PhysicalPlan) -> Result<ExecutionReport, AdapterError> {
            self.executed += 1;
            if self.fail {
                return Err(AdapterError("worker lost".into()));
            }
            let mut report = ExecutionReport::default();
            for node in &plan.nodes {
                if let Some(CacheHint::Materialize {
                    fingerprint,
                    estimated_bytes,
                    ..
                }) = &node.cache_hint
                {
                    self.next_handle += 1;
                    report.materialized.push(MaterializedOutput {
                        fingerprint: *fingerprint,
                        handle: HandleId::new(self.next_handle),
                        size_bytes: *estimated_bytes,
                    });
                }
            }
            Ok(report)
        }

        fn discard(&mut self, handles: &[HandleId]) {
            self.discarded.extend_from_slice(handles);
        }
    }

    fn shared_subtree_plan() -> LogicalPlan {
        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("events", ["user", "kind"]);
        let f = b.filter(t, Predicate::eq("kind", "click"));
        let l = b.aggregate(f, ["user"], [Aggregation::Count]);
        let f2 = b.clone_subtree(f).unwrap_or(f);
        let r = b.aggregate(f2, ["user"], [Aggregation::Max("kind".into())]);
        let j = b.join(l, r, ["user"], JoinType::Inner);
        b.build(j)
    }

    fn session(budget: u64) -> Session {
        let s = Session::new(OptimizerConfig {
            cache_budget_bytes: budget,
            ..Default::default()
        })
        .unwrap();
        s.stats()
            .register("events", DatasetStats::new(10_000, 1_000_000));
        s
    }

    #[test]
    fn second_run_reuses_materialized_subtree() {
        let s = session(1 << 30);
        let plan = shared_subtree_plan();
        let mut adapter = EchoAdapter::default();

        let first = s.run(&plan, &mut adapter).unwrap();
        assert_eq!(first.reused, 0);
        assert_eq!(first.admitted, 1);
        assert_eq!(s.cache().len(), 1);

        let second = s.run(&plan, &mut adapter).unwrap();
        assert_eq!(second.reused, 2);
        assert_eq!(second.admitted, 0);
        assert_ne!(first.plan_hash, second.plan_hash);
        // Every pin was dropped after the run.
        assert_eq!(s.cache().pinned_bytes(), 0);
    }

    #[test]
    fn failed_execution_still_releases_pins() {
        let s = session(1 << 30);
        let plan = shared_subtree_plan();
        let mut adapter = EchoAdapter::default();
        s.run(&plan, &mut adapter).unwrap();

        adapter.fail = true;
        let err = s.run(&plan, &mut adapter).unwrap_err();
        assert!(matches!(err, ExecError::Adapter(_)));
        assert_eq!(s.cache().pinned_bytes(), 0);
        assert!(s.cache().entries().iter().all(|e| e.reference_count == 0));
    }

    #[test]
    fn unknown_dataset_fails_without_executing() {
        let s = Session::new(OptimizerConfig::default()).unwrap();
        let mut adapter = EchoAdapter::default();
        let err = s.run(&shared_subtree_plan(), &mut adapter).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Plan(planwise_core::Error::UnknownDataset(_))
        ));
        assert_eq!(adapter.executed, 0);
    }

    #[test]
    fn observations_update_statistics() {
        struct Observer;
        impl ExecutionAdapter for Observer {
            fn execute(&mut self, _: &PhysicalPlan) -> Result<ExecutionReport, AdapterError> {
                let mut report = ExecutionReport::default();
                report
                    .observed
                    .insert("events".into(), DatasetStats::new(20_000, 3_000_000));
                Ok(report)
            }
        }

        let s = session(1 << 30);
        let summary = s.run(&shared_subtree_plan(), &mut Observer).unwrap();
        assert_eq!(summary.observed, vec!["events".to_string()]);
        let est = s.stats().estimate("events").unwrap();
        assert_eq!(est.row_count_estimate, 15_000);
        assert_eq!(est.byte_size_estimate, 2_000_000);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = OptimizerConfig {
            min_reuse_count_for_cache: 0,
            ..Default::default()
        };
        assert!(matches!(Session::new(cfg), Err(ExecError::Plan(_))));
    }
}
