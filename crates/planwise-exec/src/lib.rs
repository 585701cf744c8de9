#![forbid(unsafe_code)]
//! planwise-exec: the session driver around the optimizer.
//!
//! A `Session` owns the shared statistics provider and cache manager. Each
//! run optimizes a logical plan, hands the physical plan to an
//! `ExecutionAdapter`, admits the materialized results it reports, feeds
//! observed sizes back into the statistics, and releases every cache pin.

pub mod adapter;
pub mod metrics;
pub mod runtime;

pub use adapter::{AdapterError, ExecutionAdapter, ExecutionReport, MaterializedOutput};
pub use runtime::{ExecError, RunSummary, Session};
