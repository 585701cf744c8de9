//! Logical and physical plan representations.
//!
//! Both plans are arenas: nodes live in a `Vec` and refer to their inputs by
//! `NodeId`. The logical plan describes *what* to compute; the physical plan
//! produced by `planwise-planner` records *how* (join algorithm, partitioning,
//! cache hints) and is immutable once emitted.

use serde::{Deserialize, Serialize};

use crate::cache::CacheHint;
use crate::hash::PlanFingerprint;
use crate::id::{HandleId, NodeId};
use crate::stats::OutputEstimate;

/// Equi-join variants. Outer joins must keep every row of the side they
/// preserve, which rules out broadcasting that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    /// Whether every row of the left input must appear in the output.
    pub fn preserves_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn preserves_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

/// Aggregate functions over a single input column (or none, for `Count`).
/// Each produces one output column named by `output_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregation {
    /// Input column, if the function reads one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Aggregation::Count => None,
            Aggregation::Sum(c) | Aggregation::Avg(c) | Aggregation::Min(c) | Aggregation::Max(c) => {
                Some(c)
            }
        }
    }

    /// Name of the column this aggregation produces, e.g. `avg_purchase_amount`.
    pub fn output_name(&self) -> String {
        match self {
            Aggregation::Count => "count".to_string(),
            Aggregation::Sum(c) => format!("sum_{c}"),
            Aggregation::Avg(c) => format!("avg_{c}"),
            Aggregation::Min(c) => format!("min_{c}"),
            Aggregation::Max(c) => format!("max_{c}"),
        }
    }
}

/// Literal values appearing in predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Structured filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Scalar,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Scalar>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Every column the predicate reads, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        fn walk<'a>(p: &'a Predicate, out: &mut Vec<&'a str>) {
            match p {
                Predicate::Compare { column, .. } => {
                    if !out.contains(&column.as_str()) {
                        out.push(column);
                    }
                }
                Predicate::And(ps) | Predicate::Or(ps) => ps.iter().for_each(|p| walk(p, out)),
                Predicate::Not(p) => walk(p, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Operator kinds, without operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Scan,
    Filter,
    Join,
    Aggregate,
    OrderBy,
    Project,
}

/// High-level logical nodes. Children are arena indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalOp {
    Scan {
        dataset: String,
        columns: Vec<String>,
    },
    Filter {
        input: NodeId,
        predicate: Predicate,
    },
    Join {
        left: NodeId,
        right: NodeId,
        /// Equi-join columns, present under the same name on both sides.
        keys: Vec<String>,
        join_type: JoinType,
    },
    Aggregate {
        input: NodeId,
        group_by: Vec<String>,
        aggs: Vec<Aggregation>,
    },
    OrderBy {
        input: NodeId,
        keys: Vec<SortKey>,
    },
    Project {
        input: NodeId,
        columns: Vec<String>,
    },
}

impl LogicalOp {
    pub fn kind(&self) -> OperatorKind {
        match self {
            LogicalOp::Scan { .. } => OperatorKind::Scan,
            LogicalOp::Filter { .. } => OperatorKind::Filter,
            LogicalOp::Join { .. } => OperatorKind::Join,
            LogicalOp::Aggregate { .. } => OperatorKind::Aggregate,
            LogicalOp::OrderBy { .. } => OperatorKind::OrderBy,
            LogicalOp::Project { .. } => OperatorKind::Project,
        }
    }

    /// Inputs in declaration order (left before right).
    pub fn children(&self) -> Vec<NodeId> {
        use LogicalOp::*;
        match self {
            Scan { .. } => vec![],
            Filter { input, .. }
            | Aggregate { input, .. }
            | OrderBy { input, .. }
            | Project { input, .. } => vec![*input],
            Join { left, right, .. } => vec![*left, *right],
        }
    }

    /// Returns the number of inputs for this node.
    pub fn inputs(&self) -> usize {
        self.children().len()
    }
}

/// Logical plan arena. `root` is the node whose output the plan returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub nodes: Vec<LogicalOp>,
    pub root: NodeId,
}

impl LogicalPlan {
    pub fn node(&self, id: NodeId) -> Option<&LogicalOp> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes reachable from the root in post-order (children before parents,
    /// left before right). Out-of-range ids are skipped and traversal stops
    /// after `2 * len` steps, so malformed (cyclic/shared) arenas terminate;
    /// validation reports those shapes.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        // Explicit stack: (node, children_pushed)
        let mut stack = vec![(self.root, false)];
        let mut steps = 0usize;
        while let Some((id, expanded)) = stack.pop() {
            steps += 1;
            if steps > 2 * self.nodes.len() {
                break;
            }
            let Some(op) = self.node(id) else { continue };
            if expanded {
                out.push(id);
                continue;
            }
            stack.push((id, true));
            for child in op.children().into_iter().rev() {
                stack.push((child, false));
            }
        }
        out
    }
}

/// Incremental builder. Children always exist before their parent, so a
/// built plan is acyclic.
#[derive(Debug, Default)]
pub struct LogicalPlanBuilder {
    nodes: Vec<LogicalOp>,
}

impl LogicalPlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: LogicalOp) -> NodeId {
        self.nodes.push(op);
        NodeId::new((self.nodes.len() - 1) as u64)
    }

    pub fn scan<S: Into<String>>(
        &mut self,
        dataset: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> NodeId {
        self.push(LogicalOp::Scan {
            dataset: dataset.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        })
    }

    pub fn filter(&mut self, input: NodeId, predicate: Predicate) -> NodeId {
        self.push(LogicalOp::Filter { input, predicate })
    }

    pub fn join<S: Into<String>>(
        &mut self,
        left: NodeId,
        right: NodeId,
        keys: impl IntoIterator<Item = S>,
        join_type: JoinType,
    ) -> NodeId {
        self.push(LogicalOp::Join {
            left,
            right,
            keys: keys.into_iter().map(Into::into).collect(),
            join_type,
        })
    }

    pub fn aggregate<S: Into<String>>(
        &mut self,
        input: NodeId,
        group_by: impl IntoIterator<Item = S>,
        aggs: impl IntoIterator<Item = Aggregation>,
    ) -> NodeId {
        self.push(LogicalOp::Aggregate {
            input,
            group_by: group_by.into_iter().map(Into::into).collect(),
            aggs: aggs.into_iter().collect(),
        })
    }

    pub fn order_by(&mut self, input: NodeId, keys: impl IntoIterator<Item = SortKey>) -> NodeId {
        self.push(LogicalOp::OrderBy {
            input,
            keys: keys.into_iter().collect(),
        })
    }

    pub fn project<S: Into<String>>(
        &mut self,
        input: NodeId,
        columns: impl IntoIterator<Item = S>,
    ) -> NodeId {
        self.push(LogicalOp::Project {
            input,
            columns: columns.into_iter().map(Into::into).collect(),
        })
    }

    /// Deep-copy the subtree rooted at `id` so it can be used under another
    /// parent. Returns `None` if `id` (or a descendant) does not exist.
    pub fn clone_subtree(&mut self, id: NodeId) -> Option<NodeId> {
        let op = self.nodes.get(id.index())?.clone();
        let copied = match op {
            LogicalOp::Scan { .. } => op,
            LogicalOp::Filter { input, predicate } => LogicalOp::Filter {
                input: self.clone_subtree(input)?,
                predicate,
            },
            LogicalOp::Join {
                left,
                right,
                keys,
                join_type,
            } => LogicalOp::Join {
                left: self.clone_subtree(left)?,
                right: self.clone_subtree(right)?,
                keys,
                join_type,
            },
            LogicalOp::Aggregate {
                input,
                group_by,
                aggs,
            } => LogicalOp::Aggregate {
                input: self.clone_subtree(input)?,
                group_by,
                aggs,
            },
            LogicalOp::OrderBy { input, keys } => LogicalOp::OrderBy {
                input: self.clone_subtree(input)?,
                keys,
            },
            LogicalOp::Project { input, columns } => LogicalOp::Project {
                input: self.clone_subtree(input)?,
                columns,
            },
        };
        Some(self.push(copied))
    }

    pub fn build(self, root: NodeId) -> LogicalPlan {
        LogicalPlan {
            nodes: self.nodes,
            root,
        }
    }
}

/// How data is distributed across workers for a node's output.
/// Empty `key_columns` means round-robin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub count: u32,
    pub key_columns: Vec<String>,
}

impl PartitionSpec {
    pub fn round_robin(count: u32) -> Self {
        Self {
            count,
            key_columns: Vec::new(),
        }
    }

    pub fn is_round_robin(&self) -> bool {
        self.key_columns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Ship the whole `side` to every worker; the other side is not shuffled.
    Broadcast { side: BuildSide },
    /// Hash-partition both sides by the join keys.
    ShuffleHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStrategy {
    /// Partial aggregate, shuffle by grouping keys, final aggregate.
    ShuffleHash,
    /// Input is already partitioned by a subset of the grouping keys.
    PartitionLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Range-partition by the sort keys, then sort each partition.
    RangePartitioned,
    SinglePartition,
}

/// Physical operators: logical operands plus the chosen strategy.
/// Children index into the physical arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalOp {
    Scan {
        dataset: String,
        columns: Vec<String>,
    },
    Filter {
        input: NodeId,
        predicate: Predicate,
    },
    Join {
        left: NodeId,
        right: NodeId,
        keys: Vec<String>,
        join_type: JoinType,
        strategy: JoinStrategy,
    },
    Aggregate {
        input: NodeId,
        group_by: Vec<String>,
        aggs: Vec<Aggregation>,
        strategy: AggregateStrategy,
    },
    OrderBy {
        input: NodeId,
        keys: Vec<SortKey>,
        strategy: SortStrategy,
    },
    Project {
        input: NodeId,
        columns: Vec<String>,
    },
    /// Read a resident cache entry in place of the logical subtree.
    CachedRead {
        handle: HandleId,
        kind: OperatorKind,
        columns: Vec<String>,
    },
}

impl PhysicalOp {
    pub fn children(&self) -> Vec<NodeId> {
        use PhysicalOp::*;
        match self {
            Scan { .. } | CachedRead { .. } => vec![],
            Filter { input, .. }
            | Aggregate { input, .. }
            | OrderBy { input, .. }
            | Project { input, .. } => vec![*input],
            Join { left, right, .. } => vec![*left, *right],
        }
    }

    /// Short operator label used by explain output.
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::Scan { .. } => "Scan",
            PhysicalOp::Filter { .. } => "Filter",
            PhysicalOp::Join { .. } => "Join",
            PhysicalOp::Aggregate { .. } => "Aggregate",
            PhysicalOp::OrderBy { .. } => "OrderBy",
            PhysicalOp::Project { .. } => "Project",
            PhysicalOp::CachedRead { .. } => "CachedRead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub op: PhysicalOp,
    /// Logical node this was produced from.
    pub logical: NodeId,
    pub fingerprint: PlanFingerprint,
    pub partition_spec: PartitionSpec,
    pub cache_hint: Option<CacheHint>,
    /// `None` when statistics were unknown (lenient mode only).
    pub estimate: Option<OutputEstimate>,
}

/// Physical plan arena, children before parents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub nodes: Vec<PhysicalNode>,
    pub root: NodeId,
}

impl PhysicalPlan {
    pub fn node(&self, id: NodeId) -> Option<&PhysicalNode> {
        self.nodes.get(id.index())
    }

    pub fn root_node(&self) -> Option<&PhysicalNode> {
        self.node(self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PhysicalNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i as u64), n))
    }

    /// Fingerprints pinned by cache hits during optimization. Each must be
    /// released once execution finishes or is abandoned.
    pub fn pinned_fingerprints(&self) -> Vec<PlanFingerprint> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.cache_hint {
                Some(CacheHint::Reuse(entry)) => Some(entry.fingerprint),
                _ => None,
            })
            .collect()
    }

    /// Nodes whose output should be admitted to the cache after execution.
    pub fn materialization_targets(&self) -> Vec<(NodeId, PlanFingerprint)> {
        self.iter()
            .filter_map(|(id, n)| match &n.cache_hint {
                Some(CacheHint::Materialize { fingerprint, .. }) => Some((id, *fingerprint)),
                _ => None,
            })
            .collect()
    }
}
