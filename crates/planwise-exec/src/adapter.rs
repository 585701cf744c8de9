//! Boundary to the execution substrate.
//!
//! The optimizer never executes anything. An adapter receives the annotated
//! physical plan, runs it however it likes, and reports back what it
//! materialized and how large the scanned inputs really were.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use planwise_core::dag::PhysicalPlan;
use planwise_core::hash::PlanFingerprint;
use planwise_core::id::HandleId;
use planwise_core::stats::DatasetStats;

#[derive(Debug, Error)]
#[error("execution failed: {0}")]
pub struct AdapterError(pub String);

/// A subtree result the substrate materialized for a `Materialize` hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedOutput {
    pub fingerprint: PlanFingerprint,
    pub handle: HandleId,
    /// Actual size, which may differ from the optimizer's estimate.
    pub size_bytes: u64,
}

/// What an adapter learned while executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Dataset name -> observed statistics.
    pub observed: BTreeMap<String, DatasetStats>,
    pub materialized: Vec<MaterializedOutput>,
}

pub trait ExecutionAdapter {
    /// Execute `plan`. `CachedRead` nodes reference handles the adapter
    /// produced in earlier runs.
    fn execute(&mut self, plan: &PhysicalPlan) -> Result<ExecutionReport, AdapterError>;

    /// The cache no longer tracks these handles (evicted, or never
    /// admitted); the substrate may free them.
    fn discard(&mut self, _handles: &[HandleId]) {}
}
