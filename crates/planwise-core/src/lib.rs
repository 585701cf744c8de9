#![forbid(unsafe_code)]
//! planwise-core: shared vocabulary for the planwise query-pipeline optimizer.
//!
//! This crate holds pure data and the seams between components:
//! - strongly-typed ids (`id`)
//! - the logical/physical plan arenas (`dag`)
//! - dataset statistics and output estimates (`stats`)
//! - cache entry types and the cache seam used by the optimizer (`cache`)
//! - `OptimizerConfig` (`config`), stable hashing (`hash`), errors (`error`)
//!
//! No locking, no I/O. Concrete providers live in `planwise-stats` and
//! `planwise-cache`; the optimizer lives in `planwise-planner`.

pub mod cache;
pub mod config;
pub mod dag;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod stats;

pub use config::OptimizerConfig;
pub use error::{Error, Result};
pub use hash::{Hash256, PlanFingerprint};

/// Crate version, stamped into run summaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
