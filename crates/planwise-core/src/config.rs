//! Optimizer configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default broadcast threshold: 10 MiB.
pub const DEFAULT_BROADCAST_BYTE_THRESHOLD: u64 = 10 * 1024 * 1024;
/// Default target payload per shuffle partition: 64 MiB.
pub const DEFAULT_TARGET_PARTITION_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// A join side at or below this estimated size (bytes) may be broadcast.
    pub broadcast_byte_threshold: u64,

    /// Partition count for keyless shuffles; `4x` this bounds advised fan-out.
    pub default_shuffle_partitions: u32,

    /// Total bytes the cache manager may keep materialized.
    pub cache_budget_bytes: u64,

    /// A subtree must be referenced at least this many times to be cached.
    pub min_reuse_count_for_cache: u32,

    /// Desired bytes per shuffle partition.
    pub target_partition_bytes: u64,

    /// Fraction of rows a filter keeps when nothing better is known.
    pub filter_selectivity: f64,

    /// Multiplier applied to `min(left_rows, right_rows)` for join output.
    pub join_selectivity: f64,

    /// When set, scans over unknown datasets produce unknown estimates
    /// instead of aborting the optimization.
    pub allow_unknown_statistics: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            broadcast_byte_threshold: DEFAULT_BROADCAST_BYTE_THRESHOLD,
            default_shuffle_partitions: 200,
            cache_budget_bytes: 1024 * 1024 * 1024, // 1 GiB
            min_reuse_count_for_cache: 2,
            target_partition_bytes: DEFAULT_TARGET_PARTITION_BYTES,
            filter_selectivity: 0.5,
            join_selectivity: 1.0,
            allow_unknown_statistics: false,
        }
    }
}

impl OptimizerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `PLANWISE_BROADCAST_THRESHOLD_BYTES`: broadcast threshold in bytes
    /// - `PLANWISE_SHUFFLE_PARTITIONS`: default shuffle partition count
    /// - `PLANWISE_CACHE_BUDGET_BYTES`: cache budget in bytes
    /// - `PLANWISE_MIN_REUSE_COUNT`: minimum reuse count for caching
    /// - `PLANWISE_TARGET_PARTITION_BYTES`: target bytes per partition
    /// - `PLANWISE_FILTER_SELECTIVITY`: default filter selectivity
    /// - `PLANWISE_JOIN_SELECTIVITY`: default join selectivity
    /// - `PLANWISE_ALLOW_UNKNOWN_STATS`: `true`/`false`
    ///
    /// Unparseable values are ignored. Call `validate` on the result.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u64>("PLANWISE_BROADCAST_THRESHOLD_BYTES") {
            cfg.broadcast_byte_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("PLANWISE_SHUFFLE_PARTITIONS") {
            cfg.default_shuffle_partitions = v;
        }
        if let Some(v) = env_parse::<u64>("PLANWISE_CACHE_BUDGET_BYTES") {
            cfg.cache_budget_bytes = v;
        }
        if let Some(v) = env_parse::<u32>("PLANWISE_MIN_REUSE_COUNT") {
            cfg.min_reuse_count_for_cache = v;
        }
        if let Some(v) = env_parse::<u64>("PLANWISE_TARGET_PARTITION_BYTES") {
            cfg.target_partition_bytes = v;
        }
        if let Some(v) = env_parse::<f64>("PLANWISE_FILTER_SELECTIVITY") {
            cfg.filter_selectivity = v;
        }
        if let Some(v) = env_parse::<f64>("PLANWISE_JOIN_SELECTIVITY") {
            cfg.join_selectivity = v;
        }
        if let Some(v) = env_parse::<bool>("PLANWISE_ALLOW_UNKNOWN_STATS") {
            cfg.allow_unknown_statistics = v;
        }

        cfg
    }

    /// Reject configurations the optimizer cannot cost with.
    pub fn validate(&self) -> Result<()> {
        if self.min_reuse_count_for_cache < 1 {
            return Err(Error::Config(
                "min_reuse_count_for_cache must be >= 1".to_string(),
            ));
        }
        if self.default_shuffle_partitions < 1 {
            return Err(Error::Config(
                "default_shuffle_partitions must be >= 1".to_string(),
            ));
        }
        if self.target_partition_bytes < 1 {
            return Err(Error::Config(
                "target_partition_bytes must be >= 1".to_string(),
            ));
        }
        for (name, v) in [
            ("filter_selectivity", self.filter_selectivity),
            ("join_selectivity", self.join_selectivity),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(Error::Config(format!("{name} must be in (0, 1], got {v}")));
            }
        }
        Ok(())
    }

    /// Upper bound on the partition count the advisor may pick.
    pub fn max_partitions(&self) -> u32 {
        self.default_shuffle_partitions.saturating_mul(4).max(1)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = OptimizerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.broadcast_byte_threshold, 10_485_760);
        assert_eq!(cfg.max_partitions(), 800);
    }

    #[test]
    fn zero_reuse_count_is_rejected() {
        let cfg = OptimizerConfig {
            min_reuse_count_for_cache: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn selectivity_out_of_range_is_rejected() {
        let cfg = OptimizerConfig {
            filter_selectivity: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = OptimizerConfig {
            join_selectivity: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: OptimizerConfig =
            serde_json::from_str(r#"{"broadcast_byte_threshold": 42}"#).unwrap();
        assert_eq!(cfg.broadcast_byte_threshold, 42);
        assert_eq!(cfg.default_shuffle_partitions, 200);
    }
}
