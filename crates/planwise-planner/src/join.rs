//! Join strategy selection.

use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{BuildSide, JoinStrategy, JoinType};
use planwise_core::stats::OutputEstimate;

/// Chooses between broadcasting one join input and hash-shuffling both.
///
/// Rules, in order:
/// 1. Unknown statistics on either side: shuffle.
/// 2. A side estimated at zero rows is broadcast (right if both are empty).
/// 3. The smaller side (right on ties) is broadcast if it fits under
///    `broadcast_byte_threshold` and broadcasting it is safe; otherwise shuffle.
///
/// Broadcasting a side is unsafe when the join must preserve that side's
/// unmatched rows (outer joins) or when its estimate descends from a join
/// over an input that was itself above the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinStrategySelector;

impl JoinStrategySelector {
    pub fn new() -> Self {
        Self
    }

    pub fn choose(
        &self,
        join_type: JoinType,
        left: Option<&OutputEstimate>,
        right: Option<&OutputEstimate>,
        config: &OptimizerConfig,
    ) -> JoinStrategy {
        let (Some(l), Some(r)) = (left, right) else {
            tracing::debug!("join input statistics unknown; shuffling");
            return JoinStrategy::ShuffleHash;
        };

        if r.rows == 0 {
            return JoinStrategy::Broadcast {
                side: BuildSide::Right,
            };
        }
        if l.rows == 0 {
            return JoinStrategy::Broadcast {
                side: BuildSide::Left,
            };
        }

        let (side, small) = if l.bytes < r.bytes {
            (BuildSide::Left, l)
        } else {
            (BuildSide::Right, r)
        };

        if small.bytes > config.broadcast_byte_threshold {
            tracing::debug!(
                smaller_bytes = small.bytes,
                threshold = config.broadcast_byte_threshold,
                "both join inputs above broadcast threshold"
            );
            return JoinStrategy::ShuffleHash;
        }
        if !broadcast_safe(side, small, join_type) {
            tracing::debug!(?side, ?join_type, "broadcast candidate is unsafe; shuffling");
            return JoinStrategy::ShuffleHash;
        }
        JoinStrategy::Broadcast { side }
    }
}

fn broadcast_safe(side: BuildSide, est: &OutputEstimate, join_type: JoinType) -> bool {
    let preserved = match side {
        BuildSide::Left => join_type.preserves_left(),
        BuildSide::Right => join_type.preserves_right(),
    };
    !preserved && !est.broadcast_unsafe
}
