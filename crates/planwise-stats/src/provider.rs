//! In-process statistics provider.
//!
//! Reads take a shared lock and may run concurrently; registrations and
//! observations are serialized behind the write lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use planwise_core::error::{Error, Result};
use planwise_core::stats::{DatasetStats, StatisticsSource};

use crate::catalog::StatsCatalog;

/// Weight given to a new observation when blending it into the estimate.
pub const OBSERVATION_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone)]
struct DatasetRecord {
    stats: DatasetStats,
    version: u64,
    observations: u64,
}

#[derive(Debug, Default)]
pub struct StatisticsProvider {
    datasets: RwLock<HashMap<String, DatasetRecord>>,
}

impl StatisticsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a provider from a static catalog.
    pub fn from_catalog(catalog: &StatsCatalog) -> Self {
        let provider = Self::new();
        for (name, stats) in &catalog.datasets {
            provider.register(name, stats.clone());
        }
        provider
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DatasetRecord>> {
        self.datasets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DatasetRecord>> {
        self.datasets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the static estimate for a dataset.
    /// New datasets start at version 1; re-registering keeps the version.
    pub fn register(&self, dataset: &str, stats: DatasetStats) -> u64 {
        let mut map = self.write();
        let record = map
            .entry(dataset.to_string())
            .and_modify(|r| r.stats = stats.clone())
            .or_insert(DatasetRecord {
                stats,
                version: 1,
                observations: 0,
            });
        record.version
    }

    /// The dataset's contents changed: bump its version so fingerprints (and
    /// therefore cache entries) derived from the old contents stop matching.
    pub fn mark_modified(&self, dataset: &str) -> Result<u64> {
        let mut map = self.write();
        let record = map
            .get_mut(dataset)
            .ok_or_else(|| Error::UnknownDataset(dataset.to_string()))?;
        record.version += 1;
        tracing::debug!(dataset, version = record.version, "dataset modified");
        Ok(record.version)
    }

    /// Blend an observed execution into the estimate with weight
    /// `OBSERVATION_WEIGHT`. A dataset seen for the first time adopts the
    /// observation as-is. Returns the updated estimate.
    pub fn record_observation(&self, dataset: &str, observed: &DatasetStats) -> DatasetStats {
        let mut map = self.write();
        let record = map
            .entry(dataset.to_string())
            .and_modify(|r| {
                r.stats = blend(&r.stats, observed, OBSERVATION_WEIGHT);
                r.observations += 1;
            })
            .or_insert_with(|| DatasetRecord {
                stats: observed.clone(),
                version: 1,
                observations: 1,
            });
        tracing::debug!(
            dataset,
            rows = record.stats.row_count_estimate,
            bytes = record.stats.byte_size_estimate,
            observations = record.observations,
            "statistics updated from observation"
        );
        record.stats.clone()
    }

    /// Number of observations folded into the dataset's estimate.
    pub fn observation_count(&self, dataset: &str) -> Result<u64> {
        self.read()
            .get(dataset)
            .map(|r| r.observations)
            .ok_or_else(|| Error::UnknownDataset(dataset.to_string()))
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.read().contains_key(dataset)
    }

    /// Dataset names, sorted.
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Current estimates as a catalog (e.g. to persist learned statistics).
    pub fn snapshot(&self) -> StatsCatalog {
        StatsCatalog {
            datasets: self
                .read()
                .iter()
                .map(|(k, r)| (k.clone(), r.stats.clone()))
                .collect(),
        }
    }
}

impl StatisticsSource for StatisticsProvider {
    fn estimate(&self, dataset: &str) -> Result<DatasetStats> {
        self.read()
            .get(dataset)
            .map(|r| r.stats.clone())
            .ok_or_else(|| Error::UnknownDataset(dataset.to_string()))
    }

    fn dataset_version(&self, dataset: &str) -> Result<u64> {
        self.read()
            .get(dataset)
            .map(|r| r.version)
            .ok_or_else(|| Error::UnknownDataset(dataset.to_string()))
    }
}

fn ewma(prior: u64, observed: u64, weight: f64) -> u64 {
    (prior as f64 * (1.0 - weight) + observed as f64 * weight).round() as u64
}

/// Column counts seen on only one side are taken from that side.
fn blend(prior: &DatasetStats, observed: &DatasetStats, weight: f64) -> DatasetStats {
    let mut distinct = prior.distinct_key_counts.clone();
    for (col, &obs) in &observed.distinct_key_counts {
        distinct
            .entry(col.clone())
            .and_modify(|v| *v = ewma(*v, obs, weight))
            .or_insert(obs);
    }
    DatasetStats {
        row_count_estimate: ewma(prior.row_count_estimate, observed.row_count_estimate, weight),
        byte_size_estimate: ewma(prior.byte_size_estimate, observed.byte_size_estimate, weight),
        distinct_key_counts: distinct,
    }
}
