#![forbid(unsafe_code)]
//! planwise-stats: the statistics provider.
//!
//! Holds size/row-count estimates per dataset, seeded from static
//! configuration (`catalog`) and refined from observed executions with an
//! exponentially-weighted moving average (`provider`). Implements
//! `planwise_core::stats::StatisticsSource` so the optimizer only ever sees a
//! read-only view.

pub mod catalog;
pub mod error;
pub mod provider;

pub use catalog::StatsCatalog;
pub use error::CatalogError;
pub use provider::{StatisticsProvider, OBSERVATION_WEIGHT};
