//! Abstract cache interfaces.
//!
//! The concrete manager lives in `planwise-cache`. Only the entry types and
//! the read/decide seam the optimizer needs are kept here, so the planner can
//! depend on the API without pulling in the locking and eviction logic.

use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;
use crate::hash::PlanFingerprint;
use crate::id::HandleId;

/// Snapshot of a materialized intermediate result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: PlanFingerprint,
    /// Opaque reference to data held by the execution substrate.
    pub materialized_handle: HandleId,
    pub size_bytes: u64,
    /// Number of outstanding users; entries above zero are never evicted.
    pub reference_count: u32,
    /// Logical clock value of the most recent admission or lookup.
    pub last_access_time: u64,
}

/// Caching annotation attached to a physical node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheHint {
    /// The subtree is already materialized; read it instead of recomputing.
    /// The lookup pinned the entry, so the executor must release it.
    Reuse(CacheEntry),
    /// Compute this subtree, then admit its output with the real size.
    Materialize {
        fingerprint: PlanFingerprint,
        reuse_count: u32,
        estimated_bytes: u64,
    },
    /// Another occurrence of a subtree marked `Materialize` earlier in the
    /// same plan; read that result if it was admitted, else recompute.
    ReusePending { fingerprint: PlanFingerprint },
}

impl CacheHint {
    pub fn fingerprint(&self) -> PlanFingerprint {
        match self {
            CacheHint::Reuse(entry) => entry.fingerprint,
            CacheHint::Materialize { fingerprint, .. } | CacheHint::ReusePending { fingerprint } => {
                *fingerprint
            }
        }
    }
}

/// What the optimizer asks of a cache.
///
/// Implemented by `planwise-cache::CacheManager`.
pub trait MaterializationCache: Send + Sync {
    /// Look up a resident entry. On a hit the entry's reference count is
    /// incremented and its access time refreshed; nothing else changes.
    fn lookup(&self, fingerprint: &PlanFingerprint) -> Option<CacheEntry>;

    /// Whether a subtree with this reuse estimate and size is worth
    /// materializing and could be admitted within `config.cache_budget_bytes`.
    fn should_cache(
        &self,
        fingerprint: &PlanFingerprint,
        reuse_count_estimate: u32,
        size_estimate: u64,
        config: &OptimizerConfig,
    ) -> bool;
}
