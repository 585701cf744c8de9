//! Logical plan surface re-exported from core.
//!
//! We intentionally alias the core arena to avoid duplication/forking.

pub use planwise_core::dag::{
    Aggregation, CompareOp, JoinType, LogicalOp, LogicalPlan, LogicalPlanBuilder, OperatorKind,
    Predicate, Scalar, SortKey,
};
