//! Structural fingerprints of logical subtrees.
//!
//! A fingerprint covers the operator, its operands in declared order, the
//! fingerprints of its inputs in order, and for scans the dataset version.
//! Two subtrees with equal fingerprints compute the same result, so the
//! fingerprint doubles as the cache key.

use std::collections::HashMap;

use planwise_core::dag::{CompareOp, JoinType, LogicalOp, Predicate, Scalar};
use planwise_core::error::{Error, Result};
use planwise_core::hash::{FingerprintBuilder, PlanFingerprint};

/// Version used for scans over datasets the provider does not know
/// (only reachable when unknown statistics are allowed).
pub const UNKNOWN_DATASET_VERSION: u64 = 0;

fn join_tag(t: JoinType) -> &'static str {
    match t {
        JoinType::Inner => "inner",
        JoinType::Left => "left",
        JoinType::Right => "right",
        JoinType::Full => "full",
    }
}

fn compare_tag(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "eq",
        CompareOp::NotEq => "ne",
        CompareOp::Lt => "lt",
        CompareOp::LtEq => "le",
        CompareOp::Gt => "gt",
        CompareOp::GtEq => "ge",
    }
}

/// Literals are hashed with a type tag; floats by their bit pattern, so NaN,
/// `-0.0` and null stay distinct.
fn hash_scalar(b: &mut FingerprintBuilder, v: &Scalar) {
    match v {
        Scalar::Null => b.str("null"),
        Scalar::Bool(x) => b.str("bool").u64(u64::from(*x)),
        Scalar::Int(x) => b.str("int").u64(*x as u64),
        Scalar::Float(x) => b.str("float").u64(x.to_bits()),
        Scalar::Str(x) => b.str("str").str(x),
    };
}

fn hash_predicate(b: &mut FingerprintBuilder, p: &Predicate) {
    match p {
        Predicate::Compare { column, op, value } => {
            b.str("cmp").str(column).str(compare_tag(*op));
            hash_scalar(b, value);
        }
        Predicate::And(ps) | Predicate::Or(ps) => {
            let tag = if matches!(p, Predicate::And(_)) { "and" } else { "or" };
            b.str(tag).u64(ps.len() as u64);
            for p in ps {
                hash_predicate(b, p);
            }
        }
        Predicate::Not(inner) => {
            b.str("not");
            hash_predicate(b, inner);
        }
    }
}

/// Fingerprint one node. `children` must be the fingerprints of
/// `op.children()` in the same order; `dataset_version` is only read for
/// scans.
pub fn fingerprint_node(
    op: &LogicalOp,
    children: &[PlanFingerprint],
    dataset_version: u64,
) -> Result<PlanFingerprint> {
    if children.len() != op.inputs() {
        return Err(Error::Invariant(format!(
            "fingerprint of {:?} needs {} child fingerprints, got {}",
            op.kind(),
            op.inputs(),
            children.len()
        )));
    }

    let mut b;
    match op {
        LogicalOp::Scan { dataset, columns } => {
            b = FingerprintBuilder::new("scan");
            b.str(dataset).u64(dataset_version).strs(columns);
        }
        LogicalOp::Filter { predicate, .. } => {
            b = FingerprintBuilder::new("filter");
            hash_predicate(&mut b, predicate);
        }
        LogicalOp::Join {
            keys, join_type, ..
        } => {
            b = FingerprintBuilder::new("join");
            b.str(join_tag(*join_type)).strs(keys);
        }
        LogicalOp::Aggregate { group_by, aggs, .. } => {
            b = FingerprintBuilder::new("aggregate");
            b.strs(group_by).serde(aggs)?;
        }
        LogicalOp::OrderBy { keys, .. } => {
            b = FingerprintBuilder::new("order_by");
            b.serde(keys)?;
        }
        LogicalOp::Project { columns, .. } => {
            b = FingerprintBuilder::new("project");
            b.strs(columns);
        }
    }
    for c in children {
        b.child(c);
    }
    Ok(b.finish())
}

/// How many times each fingerprint occurs among `fingerprints`.
pub fn reuse_counts<'a>(
    fingerprints: impl IntoIterator<Item = &'a PlanFingerprint>,
) -> HashMap<PlanFingerprint, u32> {
    let mut counts = HashMap::new();
    for fp in fingerprints {
        *counts.entry(*fp).or_insert(0u32) += 1;
    }
    counts
}
