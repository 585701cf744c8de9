//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use planwise_core::cache::CacheHint;
use planwise_core::dag::{
    Aggregation, JoinType, LogicalPlan, LogicalPlanBuilder, PhysicalNode, PhysicalPlan, Predicate,
    SortKey,
};
use planwise_core::id::HandleId;
use planwise_core::stats::DatasetStats;
use planwise_exec::{AdapterError, ExecutionAdapter, ExecutionReport, MaterializedOutput};
use planwise_stats::StatisticsProvider;

/// transactions: 1M rows / 200 MB, users: 1000 rows / 50 KB.
pub fn register_scenario_stats(provider: &StatisticsProvider) {
    provider.register(
        "transactions",
        DatasetStats::new(1_000_000, 200_000_000).with_distinct("category", 20),
    );
    provider.register(
        "users",
        DatasetStats::new(1000, 50_000).with_distinct("gender", 3),
    );
}

/// scan(transactions) → filter(country = US) → join(users on id)
/// → aggregate(avg amount by category, gender) → order by category
pub fn scenario_plan() -> LogicalPlan {
    let mut b = LogicalPlanBuilder::new();
    let t = b.scan("transactions", ["id", "country", "category", "amount"]);
    let f = b.filter(t, Predicate::eq("country", "US"));
    let u = b.scan("users", ["id", "gender"]);
    let j = b.join(f, u, ["id"], JoinType::Inner);
    let a = b.aggregate(
        j,
        ["category", "gender"],
        [Aggregation::Avg("amount".into())],
    );
    let o = b.order_by(a, [SortKey::asc("category")]);
    b.build(o)
}

/// The same filtered scan feeds both sides of a self-join, so the filter is
/// a materialization candidate.
pub fn shared_filter_plan(dataset: &str) -> LogicalPlan {
    let mut b = LogicalPlanBuilder::new();
    let t = b.scan(dataset, ["user", "kind"]);
    let f = b.filter(t, Predicate::eq("kind", "click"));
    let left = b.aggregate(f, ["user"], [Aggregation::Count]);
    let f2 = b.clone_subtree(f).expect("filter exists");
    let right = b.aggregate(f2, ["user"], [Aggregation::Max("kind".into())]);
    let j = b.join(left, right, ["user"], JoinType::Inner);
    b.build(j)
}

pub fn find<'p>(plan: &'p PhysicalPlan, name: &str) -> &'p PhysicalNode {
    plan.nodes
        .iter()
        .find(|n| n.op.name() == name)
        .unwrap_or_else(|| panic!("no {name} node in plan"))
}

/// Stand-in execution substrate: "materializes" every `Materialize` hint,
/// reporting `size_factor` times the estimated size, and records what it
/// was asked to discard.
pub struct RecordingAdapter {
    pub size_factor: u64,
    pub next_handle: u64,
    pub executions: usize,
    pub discarded: Vec<HandleId>,
    pub observations: Vec<(String, DatasetStats)>,
    pub fail: bool,
}

impl Default for RecordingAdapter {
    fn default() -> Self {
        Self {
            size_factor: 1,
            next_handle: 0,
            executions: 0,
            discarded: Vec::new(),
            observations: Vec::new(),
            fail: false,
        }
    }
}

impl ExecutionAdapter for RecordingAdapter {
    fn execute(&mut self, plan: &PhysicalPlan) -> Result<ExecutionReport, AdapterError> {
        self.executions += 1;
        if self.fail {
            return Err(AdapterError("executor unavailable".into()));
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
                    size_bytes: estimated_bytes * self.size_factor,
                });
            }
        }
        for (name, stats) in &self.observations {
            report.observed.insert(name.clone(), stats.clone());
        }
        Ok(report)
    }

    fn discard(&mut self, handles: &[HandleId]) {
        self.discarded.extend_from_slice(handles);
    }
}
