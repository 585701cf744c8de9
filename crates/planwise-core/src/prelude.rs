//! Convenient re-exports for downstream crates.

pub use crate::cache::{CacheEntry, CacheHint, MaterializationCache};
pub use crate::config::OptimizerConfig;
pub use crate::dag::{
    Aggregation, AggregateStrategy, BuildSide, CompareOp, JoinStrategy, JoinType, LogicalOp,
    LogicalPlan, LogicalPlanBuilder, OperatorKind, PartitionSpec, PhysicalNode, PhysicalOp,
    PhysicalPlan, Predicate, Scalar, SortKey, SortStrategy,
};
pub use crate::error::{Error, Result};
pub use crate::hash::{Hash256, PlanFingerprint};
pub use crate::id::{HandleId, NodeId};
pub use crate::stats::{DatasetStats, OutputEstimate, StatisticsSource};
