#![forbid(unsafe_code)]
//! planwise-cache: materialized-intermediate cache manager.
//!
//! Concrete implementation of `planwise_core::cache::MaterializationCache`.
//! Entries are keyed by `PlanFingerprint`, accounted against a hard byte
//! budget, pinned by lookups and unpinned by `release`. Only unpinned
//! entries are ever evicted (least recently used first, larger first on ties).
//!
//! The manager never touches the data itself: handles are opaque and evicted
//! entries are returned to the caller so the execution substrate can drop them.

pub mod error;
pub mod manager;
pub mod tracking;

pub use error::{Error, Result};
pub use manager::CacheManager;
pub use tracking::{CacheStats, PeakTracker};
