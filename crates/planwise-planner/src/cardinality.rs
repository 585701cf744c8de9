//! Bottom-up output estimation.
//!
//! Each function derives a node's `OutputEstimate` from its inputs'. The
//! model is deliberately coarse: filters apply a selectivity (distinct
//! counts when the predicate allows, the configured default otherwise), joins
//! assume key/foreign-key shape (`min(left, right) * join_selectivity`), and
//! aggregates use distinct counts of the grouping keys when known.

use std::collections::BTreeMap;

use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{Aggregation, CompareOp, Predicate};
use planwise_core::stats::{DatasetStats, OutputEstimate};

fn scale(v: u64, factor: f64) -> u64 {
    (v as f64 * factor).round() as u64
}

fn cap_distinct(distinct: &mut BTreeMap<String, u64>, rows: u64) {
    for v in distinct.values_mut() {
        *v = (*v).min(rows);
    }
}

/// Scan output: the dataset estimate, with distinct counts limited to the
/// columns actually read.
pub fn scan_estimate(stats: &DatasetStats, columns: &[String]) -> OutputEstimate {
    let mut est = OutputEstimate::from(stats);
    est.distinct_counts.retain(|c, _| columns.contains(c));
    est
}

/// Fraction of rows `predicate` keeps, assuming independent conjuncts.
pub fn filter_selectivity(predicate: &Predicate, input: &OutputEstimate, default: f64) -> f64 {
    let sel = match predicate {
        Predicate::Compare { column, op, .. } => {
            match (op, input.distinct_counts.get(column).copied()) {
                (CompareOp::Eq, Some(ndv)) if ndv > 0 => 1.0 / ndv as f64,
                (CompareOp::NotEq, Some(ndv)) if ndv > 0 => 1.0 - 1.0 / ndv as f64,
                _ => default,
            }
        }
        Predicate::And(ps) => ps
            .iter()
            .map(|p| filter_selectivity(p, input, default))
            .product(),
        Predicate::Or(ps) => ps.iter().fold(0.0, |acc, p| {
            let s = filter_selectivity(p, input, default);
            acc + s - acc * s
        }),
        Predicate::Not(p) => 1.0 - filter_selectivity(p, input, default),
    };
    sel.clamp(0.0, 1.0)
}

pub fn estimate_filter(
    input: &OutputEstimate,
    predicate: &Predicate,
    config: &OptimizerConfig,
) -> OutputEstimate {
    let sel = filter_selectivity(predicate, input, config.filter_selectivity);
    let rows = scale(input.rows, sel);
    let mut distinct = input.distinct_counts.clone();
    if let Predicate::Compare {
        column,
        op: CompareOp::Eq,
        ..
    } = predicate
    {
        if let Some(v) = distinct.get_mut(column) {
            *v = 1;
        }
    }
    cap_distinct(&mut distinct, rows);
    OutputEstimate {
        rows,
        bytes: scale(input.bytes, sel),
        distinct_counts: distinct,
        broadcast_unsafe: input.broadcast_unsafe,
    }
}

/// Join output. Rows are `min(left, right) * join_selectivity`; each row is
/// as wide as a left row plus a right row.
pub fn estimate_join(
    left: &OutputEstimate,
    right: &OutputEstimate,
    config: &OptimizerConfig,
) -> OutputEstimate {
    let rows = scale(left.rows.min(right.rows), config.join_selectivity);
    let width = left.row_width() + right.row_width();
    let mut distinct = left.distinct_counts.clone();
    for (c, v) in &right.distinct_counts {
        distinct.entry(c.clone()).or_insert(*v);
    }
    cap_distinct(&mut distinct, rows);
    let threshold = config.broadcast_byte_threshold;
    OutputEstimate {
        rows,
        bytes: (rows as f64 * width).round() as u64,
        distinct_counts: distinct,
        broadcast_unsafe: left.broadcast_unsafe
            || right.broadcast_unsafe
            || left.bytes > threshold
            || right.bytes > threshold,
    }
}

/// Heuristic group fraction when key distinct counts are unknown.
fn group_fraction(num_keys: usize) -> f64 {
    match num_keys {
        1 => 0.1,
        2 => 0.25,
        3 => 0.4,
        _ => 0.5,
    }
}

/// Aggregate output. `input_columns` is the number of columns the input
/// produces; output width scales with the output column count.
pub fn estimate_aggregate(
    input: &OutputEstimate,
    input_columns: usize,
    group_by: &[String],
    aggs: &[Aggregation],
) -> OutputEstimate {
    let rows = if group_by.is_empty() {
        1
    } else if input.rows == 0 {
        0
    } else {
        let known: Option<Vec<u64>> = group_by
            .iter()
            .map(|k| input.distinct_counts.get(k).copied())
            .collect();
        let groups = match known {
            Some(ndvs) => ndvs
                .into_iter()
                .fold(1u64, |acc, n| acc.saturating_mul(n.max(1))),
            None => scale(input.rows, group_fraction(group_by.len())).max(1),
        };
        groups.min(input.rows)
    };

    let col_width = input.row_width() / input_columns.max(1) as f64;
    let out_columns = group_by.len() + aggs.len();
    let mut distinct: BTreeMap<String, u64> = input
        .distinct_counts
        .iter()
        .filter(|(c, _)| group_by.contains(c))
        .map(|(c, v)| (c.clone(), *v))
        .collect();
    cap_distinct(&mut distinct, rows);

    OutputEstimate {
        rows,
        bytes: (rows as f64 * col_width * out_columns as f64).round() as u64,
        distinct_counts: distinct,
        broadcast_unsafe: false,
    }
}

/// Projection keeps every row; bytes shrink with the fraction of columns kept.
pub fn estimate_project(
    input: &OutputEstimate,
    input_columns: usize,
    kept: &[String],
) -> OutputEstimate {
    let frac = if input_columns == 0 {
        1.0
    } else {
        (kept.len() as f64 / input_columns as f64).min(1.0)
    };
    OutputEstimate {
        rows: input.rows,
        bytes: scale(input.bytes, frac),
        distinct_counts: input
            .distinct_counts
            .iter()
            .filter(|(c, _)| kept.contains(c))
            .map(|(c, v)| (c.clone(), *v))
            .collect(),
        broadcast_unsafe: input.broadcast_unsafe,
    }
}

/// Sorting neither adds nor removes rows.
pub fn estimate_order_by(input: &OutputEstimate) -> OutputEstimate {
    input.clone()
}
