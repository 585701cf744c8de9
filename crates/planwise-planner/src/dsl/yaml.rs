//! YAML → LogicalPlan parser for tree-shaped pipelines.
//!
//! Example:
//! ```yaml
//! config:
//!   broadcast_byte_threshold: 10485760
//! shared:
//!   us_transactions:
//!     op: filter
//!     predicate: { column: country, op: eq, value: US }
//!     input: { op: scan, dataset: transactions, columns: [id, country, category, amount] }
//! plan:
//!   op: order_by
//!   keys: [category]
//!   input:
//!     op: aggregate
//!     group_by: [category, gender]
//!     aggs: [ { fn: avg, column: amount } ]
//!     input:
//!       op: join
//!       keys: [id]
//!       left: { op: ref, name: us_transactions }
//!       right: { op: scan, dataset: users, columns: [id, gender] }
//! ```
//!
//! `shared` subtrees are expanded afresh at every `ref`, so repeated uses
//! fingerprint identically and become cache candidates.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{
    Aggregation, CompareOp, JoinType, LogicalPlan, LogicalPlanBuilder, Predicate, Scalar, SortKey,
};
use planwise_core::id::NodeId;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub config: Option<PipelineConfig>,
    #[serde(default)]
    pub shared: BTreeMap<String, NodeDef>,
    pub plan: NodeDef,
}

/// Optimizer settings a pipeline may override. Unset fields keep whatever
/// the caller already configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub broadcast_byte_threshold: Option<u64>,
    pub default_shuffle_partitions: Option<u32>,
    pub cache_budget_bytes: Option<u64>,
    pub min_reuse_count_for_cache: Option<u32>,
    pub target_partition_bytes: Option<u64>,
    pub filter_selectivity: Option<f64>,
    pub join_selectivity: Option<f64>,
    pub allow_unknown_statistics: Option<bool>,
}

impl PipelineConfig {
    pub fn apply(&self, cfg: &mut OptimizerConfig) {
        if let Some(v) = self.broadcast_byte_threshold {
            cfg.broadcast_byte_threshold = v;
        }
        if let Some(v) = self.default_shuffle_partitions {
            cfg.default_shuffle_partitions = v;
        }
        if let Some(v) = self.cache_budget_bytes {
            cfg.cache_budget_bytes = v;
        }
        if let Some(v) = self.min_reuse_count_for_cache {
            cfg.min_reuse_count_for_cache = v;
        }
        if let Some(v) = self.target_partition_bytes {
            cfg.target_partition_bytes = v;
        }
        if let Some(v) = self.filter_selectivity {
            cfg.filter_selectivity = v;
        }
        if let Some(v) = self.join_selectivity {
            cfg.join_selectivity = v;
        }
        if let Some(v) = self.allow_unknown_statistics {
            cfg.allow_unknown_statistics = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeDef {
    Scan {
        dataset: String,
        columns: Vec<String>,
    },
    Filter {
        predicate: PredicateDef,
        input: Box<NodeDef>,
    },
    Join {
        keys: Vec<String>,
        #[serde(default = "default_join_type")]
        join_type: JoinType,
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },
    Aggregate {
        #[serde(default)]
        group_by: Vec<String>,
        #[serde(default)]
        aggs: Vec<AggDef>,
        input: Box<NodeDef>,
    },
    OrderBy {
        keys: Vec<SortKeyDef>,
        input: Box<NodeDef>,
    },
    Project {
        columns: Vec<String>,
        input: Box<NodeDef>,
    },
    /// Expands the `shared` subtree with this name.
    Ref { name: String },
}

fn default_join_type() -> JoinType {
    JoinType::Inner
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateDef {
    Compare {
        column: String,
        op: CompareOp,
        value: Scalar,
    },
    And {
        and: Vec<PredicateDef>,
    },
    Or {
        or: Vec<PredicateDef>,
    },
    Not {
        not: Box<PredicateDef>,
    },
}

impl From<PredicateDef> for Predicate {
    fn from(def: PredicateDef) -> Self {
        match def {
            PredicateDef::Compare { column, op, value } => Predicate::Compare { column, op, value },
            PredicateDef::And { and } => Predicate::And(and.into_iter().map(Into::into).collect()),
            PredicateDef::Or { or } => Predicate::Or(or.into_iter().map(Into::into).collect()),
            PredicateDef::Not { not } => Predicate::Not(Box::new((*not).into())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggDef {
    #[serde(rename = "fn")]
    pub func: String,
    #[serde(default)]
    pub column: Option<String>,
}

impl AggDef {
    fn to_aggregation(&self) -> Result<Aggregation, DslError> {
        let column = || {
            self.column
                .clone()
                .ok_or_else(|| DslError::Invalid(format!("aggregate '{}' needs a column", self.func)))
        };
        Ok(match self.func.to_ascii_lowercase().as_str() {
            "count" => Aggregation::Count,
            "sum" => Aggregation::Sum(column()?),
            "avg" | "mean" => Aggregation::Avg(column()?),
            "min" => Aggregation::Min(column()?),
            "max" => Aggregation::Max(column()?),
            other => {
                return Err(DslError::Invalid(format!(
                    "unknown aggregate function '{other}'"
                )))
            }
        })
    }
}

/// A sort key: either a bare column name (ascending) or `{column, ascending}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKeyDef {
    Column(String),
    Full(SortKey),
}

impl From<SortKeyDef> for SortKey {
    fn from(def: SortKeyDef) -> Self {
        match def {
            SortKeyDef::Column(c) => SortKey::asc(c),
            SortKeyDef::Full(k) => k,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub plan: LogicalPlan,
    pub config: PipelineConfig,
}

pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline, DslError> {
    let doc: Pipeline = serde_yaml::from_str(yaml_src)?;
    let mut lowering = Lowering {
        shared: &doc.shared,
        builder: LogicalPlanBuilder::new(),
        expanding: HashSet::new(),
    };
    let root = lowering.lower(&doc.plan)?;
    Ok(ParsedPipeline {
        plan: lowering.builder.build(root),
        config: doc.config.unwrap_or_default(),
    })
}

struct Lowering<'a> {
    shared: &'a BTreeMap<String, NodeDef>,
    builder: LogicalPlanBuilder,
    /// `shared` names currently being expanded, to reject cycles.
    expanding: HashSet<String>,
}

impl Lowering<'_> {
    fn lower(&mut self, def: &NodeDef) -> Result<NodeId, DslError> {
        Ok(match def {
            NodeDef::Scan { dataset, columns } => self.builder.scan(dataset.as_str(), columns),
            NodeDef::Filter { predicate, input } => {
                let input = self.lower(input)?;
                self.builder.filter(input, predicate.clone().into())
            }
            NodeDef::Join {
                keys,
                join_type,
                left,
                right,
            } => {
                let l = self.lower(left)?;
                let r = self.lower(right)?;
                self.builder.join(l, r, keys, *join_type)
            }
            NodeDef::Aggregate {
                group_by,
                aggs,
                input,
            } => {
                let aggs = aggs
                    .iter()
                    .map(AggDef::to_aggregation)
                    .collect::<Result<Vec<_>, _>>()?;
                let input = self.lower(input)?;
                self.builder.aggregate(input, group_by, aggs)
            }
            NodeDef::OrderBy { keys, input } => {
                let input = self.lower(input)?;
                self.builder
                    .order_by(input, keys.iter().cloned().map(SortKey::from))
            }
            NodeDef::Project { columns, input } => {
                let input = self.lower(input)?;
                self.builder.project(input, columns)
            }
            NodeDef::Ref { name } => {
                let shared = self.shared;
                let target = shared
                    .get(name)
                    .ok_or_else(|| DslError::Invalid(format!("unknown shared subtree '{name}'")))?;
                if !self.expanding.insert(name.clone()) {
                    return Err(DslError::Invalid(format!(
                        "shared subtree '{name}' refers to itself"
                    )));
                }
                let id = self.lower(target);
                self.expanding.remove(name);
                id?
            }
        })
    }
}
