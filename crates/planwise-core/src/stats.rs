//! Dataset statistics and the estimates the optimizer derives from them.
//!
//! `DatasetStats` is owned by the statistics provider (`planwise-stats`);
//! every other component only reads snapshots through `StatisticsSource`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Size estimates for a named dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub row_count_estimate: u64,
    pub byte_size_estimate: u64,
    /// Column name -> estimated number of distinct values.
    #[serde(default)]
    pub distinct_key_counts: BTreeMap<String, u64>,
}

impl DatasetStats {
    pub fn new(row_count_estimate: u64, byte_size_estimate: u64) -> Self {
        Self {
            row_count_estimate,
            byte_size_estimate,
            distinct_key_counts: BTreeMap::new(),
        }
    }

    pub fn with_distinct(mut self, column: impl Into<String>, count: u64) -> Self {
        self.distinct_key_counts.insert(column.into(), count);
        self
    }
}

/// Estimated output of a plan node, propagated bottom-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputEstimate {
    pub rows: u64,
    pub bytes: u64,
    /// Distinct-value estimates for columns still present in the output.
    pub distinct_counts: BTreeMap<String, u64>,
    /// Set when the estimate descends from a join over an input above the
    /// broadcast threshold; such sizes are not trusted for broadcasting.
    pub broadcast_unsafe: bool,
}

impl OutputEstimate {
    /// Average bytes per row (0 for empty outputs).
    pub fn row_width(&self) -> f64 {
        if self.rows == 0 {
            0.0
        } else {
            self.bytes as f64 / self.rows as f64
        }
    }
}

impl From<&DatasetStats> for OutputEstimate {
    fn from(s: &DatasetStats) -> Self {
        Self {
            rows: s.row_count_estimate,
            bytes: s.byte_size_estimate,
            distinct_counts: s.distinct_key_counts.clone(),
            broadcast_unsafe: false,
        }
    }
}

/// Read side of the statistics provider, as seen by the optimizer.
///
/// Implemented by `planwise-stats::StatisticsProvider`. Implementations must
/// be safe for concurrent reads.
pub trait StatisticsSource: Send + Sync {
    /// Current estimate, or `Error::UnknownDataset`.
    fn estimate(&self, dataset: &str) -> Result<DatasetStats>;

    /// Data version of the dataset, or `Error::UnknownDataset`.
    /// Bumped whenever the underlying data changes, never by observations.
    fn dataset_version(&self, dataset: &str) -> Result<u64>;
}
