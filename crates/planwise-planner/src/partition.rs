//! Partition count and key selection for shuffles.

use planwise_core::config::{OptimizerConfig, DEFAULT_TARGET_PARTITION_BYTES};
use planwise_core::dag::{OperatorKind, PartitionSpec};
use planwise_core::stats::OutputEstimate;

/// Sizes shuffles so each partition carries roughly `target_partition_bytes`.
///
/// The count is `ceil(bytes / target)`, clamped to
/// `[1, 4 * default_shuffle_partitions]`. Keyless operators and inputs with
/// unknown size get `default_shuffle_partitions`.
#[derive(Debug, Clone, Copy)]
pub struct PartitionAdvisor {
    target_partition_bytes: u64,
}

impl Default for PartitionAdvisor {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_PARTITION_BYTES)
    }
}

impl PartitionAdvisor {
    pub fn new(target_partition_bytes: u64) -> Self {
        Self {
            target_partition_bytes: target_partition_bytes.max(1),
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.target_partition_bytes)
    }

    pub fn target_partition_bytes(&self) -> u64 {
        self.target_partition_bytes
    }

    pub fn advise(
        &self,
        kind: OperatorKind,
        keys: &[String],
        input: Option<&OutputEstimate>,
        config: &OptimizerConfig,
    ) -> PartitionSpec {
        let default = config.default_shuffle_partitions.max(1);
        if keys.is_empty() {
            return PartitionSpec::round_robin(default);
        }

        let count = match input {
            Some(est) => {
                let wanted = est.bytes.div_ceil(self.target_partition_bytes).max(1);
                u32::try_from(wanted)
                    .unwrap_or(u32::MAX)
                    .clamp(1, config.max_partitions())
            }
            None => default.min(config.max_partitions()),
        };

        let mut key_columns: Vec<String> = Vec::with_capacity(keys.len());
        for k in keys {
            if !key_columns.contains(k) {
                key_columns.push(k.clone());
            }
        }

        tracing::trace!(?kind, count, keys = ?key_columns, "partitioning advised");
        PartitionSpec { count, key_columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn advise(bytes: Option<u64>, keys: &[&str]) -> PartitionSpec {
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        let est = bytes.map(|b| OutputEstimate {
            rows: 1,
            bytes: b,
            ..Default::default()
        });
        PartitionAdvisor::default().advise(
            OperatorKind::Aggregate,
            &keys,
            est.as_ref(),
            &OptimizerConfig::default(),
        )
    }

    #[test]
    fn count_is_bytes_over_target_rounded_up() {
        assert_eq!(advise(Some(64 * MIB), &["k"]).count, 1);
        assert_eq!(advise(Some(64 * MIB + 1), &["k"]).count, 2);
        assert_eq!(advise(Some(640 * MIB), &["k"]).count, 10);
    }

    #[test]
    fn count_is_clamped() {
        assert_eq!(advise(Some(0), &["k"]).count, 1);
        assert_eq!(advise(Some(u64::MAX), &["k"]).count, 800);
    }

    #[test]
    fn keyless_and_unknown_use_default() {
        let spec = advise(Some(640 * MIB), &[]);
        assert_eq!(spec, PartitionSpec::round_robin(200));
        assert_eq!(advise(None, &["k"]).count, 200);
    }

    #[test]
    fn keys_keep_declared_order() {
        let spec = advise(Some(MIB), &["category", "gender", "category"]);
        assert_eq!(spec.key_columns, vec!["category", "gender"]);
    }
}
