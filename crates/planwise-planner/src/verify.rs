//! Consistency checks for emitted physical plans.
//!
//! Cheap enough for tests and the CLI to run on every plan; the optimizer
//! itself never produces a plan that fails them.

use planwise_core::cache::CacheHint;
use planwise_core::dag::{OperatorKind, PhysicalOp, PhysicalPlan};
use planwise_core::error::{Error, Result};

fn violation(msg: String) -> Error {
    Error::Invariant(msg)
}

/// Output columns of every node, in arena order.
pub fn physical_columns(plan: &PhysicalPlan) -> Result<Vec<Vec<String>>> {
    let mut out: Vec<Vec<String>> = Vec::with_capacity(plan.len());
    for (id, node) in plan.iter() {
        for c in node.op.children() {
            if c.index() >= id.index() {
                return Err(violation(format!("{id} reads {c}, which does not precede it")));
            }
        }
        let cols = match &node.op {
            PhysicalOp::Scan { columns, .. }
            | PhysicalOp::Project { columns, .. }
            | PhysicalOp::CachedRead { columns, .. } => columns.clone(),
            PhysicalOp::Filter { input, .. } | PhysicalOp::OrderBy { input, .. } => {
                out[input.index()].clone()
            }
            PhysicalOp::Join {
                left, right, keys, ..
            } => {
                let mut cols = out[left.index()].clone();
                cols.extend(
                    out[right.index()]
                        .iter()
                        .filter(|c| !keys.contains(c))
                        .cloned(),
                );
                cols
            }
            PhysicalOp::Aggregate { group_by, aggs, .. } => group_by
                .iter()
                .cloned()
                .chain(aggs.iter().map(|a| a.output_name()))
                .collect(),
        };
        out.push(cols);
    }
    Ok(out)
}

/// Check a physical plan:
/// - children precede parents and the root exists;
/// - every partition count is at least 1;
/// - partition keys of nodes at or above a join/aggregate are columns the
///   node actually produces;
/// - a join or aggregate is only partitioned by its own join or grouping keys;
/// - cache hints carry the fingerprint of the node they annotate.
pub fn check_physical_plan(plan: &PhysicalPlan) -> Result<()> {
    if plan.root_node().is_none() {
        return Err(violation(format!("root {} is out of range", plan.root)));
    }
    let columns = physical_columns(plan)?;

    // Whether the node has a join or aggregate at or below it.
    let mut below_shuffle: Vec<bool> = Vec::with_capacity(plan.len());
    for (id, node) in plan.iter() {
        let spec = &node.partition_spec;
        if spec.count == 0 {
            return Err(violation(format!("{id} has zero partitions")));
        }

        let shuffles = matches!(
            node.op,
            PhysicalOp::Join { .. }
                | PhysicalOp::Aggregate { .. }
                | PhysicalOp::CachedRead {
                    kind: OperatorKind::Join | OperatorKind::Aggregate,
                    ..
                }
        );
        let inherited = node.op.children().iter().any(|c| below_shuffle[c.index()]);
        let downstream = shuffles || inherited;
        below_shuffle.push(downstream);

        if downstream {
            let available = &columns[id.index()];
            if let Some(k) = spec.key_columns.iter().find(|k| !available.contains(k)) {
                return Err(violation(format!(
                    "{id} ({}) is partitioned by '{k}', which it does not produce",
                    node.op.name()
                )));
            }
        }

        let own_keys = match &node.op {
            PhysicalOp::Join { keys, .. } => Some(keys),
            PhysicalOp::Aggregate { group_by, .. } => Some(group_by),
            _ => None,
        };
        if let Some(own) = own_keys {
            if let Some(k) = spec.key_columns.iter().find(|k| !own.contains(k)) {
                return Err(violation(format!(
                    "{id} ({}) is partitioned by '{k}', which is not one of its keys",
                    node.op.name()
                )));
            }
        }

        if let Some(hint) = &node.cache_hint {
            if hint.fingerprint() != node.fingerprint {
                return Err(violation(format!(
                    "{id} carries a cache hint for another subtree"
                )));
            }
            let is_read = matches!(node.op, PhysicalOp::CachedRead { .. });
            if is_read != matches!(hint, CacheHint::Reuse(_)) {
                return Err(violation(format!(
                    "{id}: cached reads and reuse hints must coincide"
                )));
            }
        }
    }
    Ok(())
}
