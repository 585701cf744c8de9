use planwise_core::hash::PlanFingerprint;
use thiserror::Error;

/// Result type local to planwise-cache.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cache budget exceeded: requested {requested} bytes, capacity {capacity}, used {used}, pinned {pinned}")]
    BudgetExceeded {
        requested: u64,
        capacity: u64,
        used: u64,
        pinned: u64,
    },

    #[error("no cache entry for fingerprint {0}")]
    NotResident(PlanFingerprint),

    #[error("cache entry {0} has no outstanding references")]
    NotReferenced(PlanFingerprint),

    #[error("cache entry {0} is still referenced")]
    Pinned(PlanFingerprint),
}
