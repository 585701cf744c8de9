//! Rendering and digests of emitted physical plans.

use std::fmt::Write as _;

use planwise_core::cache::CacheHint;
use planwise_core::dag::{
    AggregateStrategy, BuildSide, CompareOp, JoinStrategy, PhysicalNode, PhysicalOp,
    PhysicalPlan, Predicate, Scalar, SortStrategy,
};
use planwise_core::error::Result;
use planwise_core::hash::{hash_serde, Hash256};
use planwise_core::id::NodeId;

/// Stable digest of the whole plan (operators, strategies, partitioning,
/// hints and estimates). Equal plans hash equal across runs.
pub fn plan_digest(plan: &PhysicalPlan) -> Result<Hash256> {
    hash_serde(plan)
}

/// Indented tree, root first, one node per line.
pub fn explain(plan: &PhysicalPlan) -> String {
    let mut out = String::new();
    // (node, depth); children pushed in reverse so the left input prints first.
    let mut stack: Vec<(NodeId, usize)> = vec![(plan.root, 0)];
    while let Some((id, depth)) = stack.pop() {
        let Some(node) = plan.node(id) else {
            let _ = writeln!(out, "{}<missing {id}>", "  ".repeat(depth));
            continue;
        };
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), describe(node));
        for child in node.op.children().into_iter().rev() {
            if child.index() < id.index() {
                stack.push((child, depth + 1));
            }
        }
    }
    out
}

fn describe(node: &PhysicalNode) -> String {
    let mut line = match &node.op {
        PhysicalOp::Scan { dataset, columns } => {
            format!("Scan {dataset} [{}]", columns.join(", "))
        }
        PhysicalOp::Filter { predicate, .. } => format!("Filter {}", render_predicate(predicate)),
        PhysicalOp::Join {
            keys,
            join_type,
            strategy,
            ..
        } => {
            let strategy = match strategy {
                JoinStrategy::Broadcast {
                    side: BuildSide::Left,
                } => "broadcast(left)",
                JoinStrategy::Broadcast {
                    side: BuildSide::Right,
                } => "broadcast(right)",
                JoinStrategy::ShuffleHash => "shuffle_hash",
            };
            format!(
                "Join {join_type:?} on [{}] strategy={strategy}",
                keys.join(", ")
            )
        }
        PhysicalOp::Aggregate {
            group_by,
            aggs,
            strategy,
            ..
        } => {
            let strategy = match strategy {
                AggregateStrategy::ShuffleHash => "shuffle_hash",
                AggregateStrategy::PartitionLocal => "partition_local",
            };
            let aggs: Vec<String> = aggs.iter().map(|a| a.output_name()).collect();
            format!(
                "Aggregate by [{}] -> [{}] strategy={strategy}",
                group_by.join(", "),
                aggs.join(", ")
            )
        }
        PhysicalOp::OrderBy { keys, strategy, .. } => {
            let keys: Vec<String> = keys
                .iter()
                .map(|k| {
                    if k.ascending {
                        k.column.clone()
                    } else {
                        format!("{} desc", k.column)
                    }
                })
                .collect();
            let strategy = match strategy {
                SortStrategy::RangePartitioned => "range_partitioned",
                SortStrategy::SinglePartition => "single_partition",
            };
            format!("OrderBy [{}] strategy={strategy}", keys.join(", "))
        }
        PhysicalOp::Project { columns, .. } => format!("Project [{}]", columns.join(", ")),
        PhysicalOp::CachedRead { handle, kind, .. } => {
            format!("CachedRead {handle} (replaces {kind:?})")
        }
    };

    let spec = &node.partition_spec;
    if spec.is_round_robin() {
        let _ = write!(line, " partitions={}", spec.count);
    } else {
        let _ = write!(
            line,
            " partitions={} by [{}]",
            spec.count,
            spec.key_columns.join(", ")
        );
    }
    match &node.estimate {
        Some(est) => {
            let _ = write!(line, " rows~{} bytes~{}", est.rows, est.bytes);
        }
        None => line.push_str(" rows=? bytes=?"),
    }
    match &node.cache_hint {
        Some(CacheHint::Reuse(entry)) => {
            let _ = write!(line, " cache=reuse({})", entry.fingerprint.short());
        }
        Some(CacheHint::Materialize {
            fingerprint,
            reuse_count,
            ..
        }) => {
            let _ = write!(line, " cache=materialize({}, x{reuse_count})", fingerprint.short());
        }
        Some(CacheHint::ReusePending { fingerprint }) => {
            let _ = write!(line, " cache=pending({})", fingerprint.short());
        }
        None => {}
    }
    line
}

fn render_scalar(v: &Scalar) -> String {
    match v {
        Scalar::Null => "null".to_string(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) => format!("'{s}'"),
    }
}

pub fn render_predicate(p: &Predicate) -> String {
    match p {
        Predicate::Compare { column, op, value } => {
            let op = match op {
                CompareOp::Eq => "=",
                CompareOp::NotEq => "!=",
                CompareOp::Lt => "<",
                CompareOp::LtEq => "<=",
                CompareOp::Gt => ">",
                CompareOp::GtEq => ">=",
            };
            format!("{column} {op} {}", render_scalar(value))
        }
        Predicate::And(ps) => {
            let parts: Vec<String> = ps.iter().map(render_predicate).collect();
            format!("({})", parts.join(" AND "))
        }
        Predicate::Or(ps) => {
            let parts: Vec<String> = ps.iter().map(render_predicate).collect();
            format!("({})", parts.join(" OR "))
        }
        Predicate::Not(inner) => format!("NOT {}", render_predicate(inner)),
    }
}
