#![forbid(unsafe_code)]
//! planwise-planner: logical plan → annotated physical plan.
//!
//! Design:
//! - We reuse `planwise-core::dag::{LogicalPlan, PhysicalPlan}` arenas.
//! - This crate adds:
//!     * structural validation (`validate`) and fingerprinting (`fingerprint`)
//!     * bottom-up cardinality estimation (`cardinality`)
//!     * the join strategy selector (`join`) and partition advisor (`partition`)
//!     * the single-pass optimizer that ties them together (`optimizer`)
//!     * invariant checks (`verify`), explain/digest (`physical`)
//!     * a small YAML pipeline DSL → `LogicalPlan` (`dsl`)
//!
//! Statistics and cache state are reached only through the
//! `StatisticsSource` / `MaterializationCache` seams in core.

pub mod cardinality;
pub mod dsl;
pub mod fingerprint;
pub mod join;
pub mod logical;
pub mod optimizer;
pub mod partition;
pub mod physical;
pub mod validate;
pub mod verify;

pub use dsl::yaml::{parse_yaml_pipeline, DslError, ParsedPipeline, PipelineConfig};
pub use join::JoinStrategySelector;
pub use logical::{Aggregation, JoinType, LogicalPlan, LogicalPlanBuilder, Predicate, SortKey};
pub use optimizer::{optimize, Optimizer};
pub use partition::PartitionAdvisor;
pub use physical::{explain, plan_digest};
