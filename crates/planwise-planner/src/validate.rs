//! Structural validation of logical plans.
//!
//! Runs before anything is costed. A plan that passes is a tree (every node
//! has at most one parent, children precede parents in the arena) whose
//! operators only reference columns their inputs actually produce.

use std::collections::HashSet;

use planwise_core::dag::{LogicalOp, LogicalPlan, Predicate};
use planwise_core::error::{Error, Result};
use planwise_core::id::NodeId;

/// Result of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    /// Reachable nodes, children before parents.
    pub order: Vec<NodeId>,
    /// Output columns per arena slot (empty for unreachable nodes).
    pub columns: Vec<Vec<String>>,
    /// Reachable parent of each arena slot, if any.
    pub parents: Vec<Option<NodeId>>,
}

impl ValidatedPlan {
    pub fn columns_of(&self, id: NodeId) -> &[String] {
        self.columns.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id.index()).copied().flatten()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidPlan(msg.into())
}

pub fn validate(plan: &LogicalPlan) -> Result<ValidatedPlan> {
    if plan.is_empty() {
        return Err(invalid("plan has no nodes"));
    }
    if plan.root.index() >= plan.len() {
        return Err(invalid(format!("root {} is out of range", plan.root)));
    }

    for (i, op) in plan.nodes.iter().enumerate() {
        let id = NodeId::new(i as u64);
        for child in op.children() {
            if child.index() >= plan.len() {
                return Err(invalid(format!("{id} references missing input {child}")));
            }
            // Children before parents: rules out cycles and self-references.
            if child.index() >= i {
                return Err(invalid(format!(
                    "{id} references {child}, which does not precede it"
                )));
            }
        }
    }

    // Nodes the root cannot reach are ignored from here on.
    let order = plan.post_order();
    let mut parents: Vec<Option<NodeId>> = vec![None; plan.len()];
    for &id in &order {
        for child in plan.nodes[id.index()].children() {
            if let Some(existing) = parents[child.index()] {
                return Err(invalid(format!(
                    "{child} has two parents ({existing} and {id}); clone shared subtrees"
                )));
            }
            parents[child.index()] = Some(id);
        }
    }

    let mut columns: Vec<Vec<String>> = vec![Vec::new(); plan.len()];
    for &id in &order {
        let op = &plan.nodes[id.index()];
        let out = output_columns(id, op, &columns)?;
        columns[id.index()] = out;
    }

    Ok(ValidatedPlan {
        order,
        columns,
        parents,
    })
}

fn require_present(id: NodeId, available: &[String], wanted: &str, role: &str) -> Result<()> {
    if available.iter().any(|c| c == wanted) {
        Ok(())
    } else {
        Err(invalid(format!(
            "{id}: {role} column '{wanted}' is not produced by its input"
        )))
    }
}

fn require_unique(id: NodeId, names: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(invalid(format!("{id}: duplicate {what} '{n}'")));
        }
    }
    Ok(())
}

fn check_predicate(id: NodeId, p: &Predicate, input: &[String]) -> Result<()> {
    match p {
        Predicate::Compare { column, .. } => require_present(id, input, column, "predicate"),
        Predicate::And(ps) | Predicate::Or(ps) => {
            if ps.is_empty() {
                return Err(invalid(format!("{id}: empty boolean connective in predicate")));
            }
            ps.iter().try_for_each(|p| check_predicate(id, p, input))
        }
        Predicate::Not(inner) => check_predicate(id, inner, input),
    }
}

/// Output columns of `op`, given the already-computed outputs of its inputs.
fn output_columns(id: NodeId, op: &LogicalOp, columns: &[Vec<String>]) -> Result<Vec<String>> {
    let input_of = |n: &NodeId| columns[n.index()].as_slice();
    match op {
        LogicalOp::Scan {
            dataset,
            columns: cols,
        } => {
            if dataset.is_empty() {
                return Err(invalid(format!("{id}: scan without a dataset name")));
            }
            if cols.is_empty() {
                return Err(invalid(format!("{id}: scan of '{dataset}' reads no columns")));
            }
            require_unique(id, cols, "scan column")?;
            Ok(cols.clone())
        }
        LogicalOp::Filter { input, predicate } => {
            let inp = input_of(input);
            check_predicate(id, predicate, inp)?;
            Ok(inp.to_vec())
        }
        LogicalOp::Join {
            left, right, keys, ..
        } => {
            if keys.is_empty() {
                return Err(invalid(format!("{id}: join without keys")));
            }
            require_unique(id, keys, "join key")?;
            let (l, r) = (input_of(left), input_of(right));
            for k in keys {
                require_present(id, l, k, "left join key")?;
                require_present(id, r, k, "right join key")?;
            }
            // Keys appear once; any other name on both sides would be ambiguous.
            let mut out = l.to_vec();
            for c in r {
                if keys.contains(c) {
                    continue;
                }
                if l.contains(c) {
                    return Err(invalid(format!(
                        "{id}: column '{c}' exists on both join inputs; project it away first"
                    )));
                }
                out.push(c.clone());
            }
            Ok(out)
        }
        LogicalOp::Aggregate {
            input,
            group_by,
            aggs,
        } => {
            if group_by.is_empty() && aggs.is_empty() {
                return Err(invalid(format!("{id}: aggregate with no keys and no functions")));
            }
            let inp = input_of(input);
            for k in group_by {
                require_present(id, inp, k, "grouping")?;
            }
            for a in aggs {
                if let Some(c) = a.column() {
                    require_present(id, inp, c, "aggregated")?;
                }
            }
            let mut out = group_by.clone();
            out.extend(aggs.iter().map(|a| a.output_name()));
            require_unique(id, &out, "aggregate output")?;
            Ok(out)
        }
        LogicalOp::OrderBy { input, keys } => {
            if keys.is_empty() {
                return Err(invalid(format!("{id}: order_by without keys")));
            }
            let inp = input_of(input);
            for k in keys {
                require_present(id, inp, &k.column, "sort")?;
            }
            Ok(inp.to_vec())
        }
        LogicalOp::Project {
            input,
            columns: cols,
        } => {
            if cols.is_empty() {
                return Err(invalid(format!("{id}: projection keeps no columns")));
            }
            let inp = input_of(input);
            for c in cols {
                require_present(id, inp, c, "projected")?;
            }
            require_unique(id, cols, "projected column")?;
            Ok(cols.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_core::dag::{Aggregation, JoinType, LogicalPlanBuilder, SortKey};

    fn assert_invalid(plan: &LogicalPlan) {
        assert!(
            matches!(validate(plan), Err(Error::InvalidPlan(_))),
            "expected InvalidPlan for {plan:?}"
        );
    }

    #[test]
    fn derives_output_columns() {
        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("transactions", ["id", "category", "amount"]);
        let u = b.scan("users", ["id", "gender"]);
        let j = b.join(t, u, ["id"], JoinType::Inner);
        let a = b.aggregate(j, ["category", "gender"], [Aggregation::Avg("amount".into())]);
        let plan = b.build(a);

        let v = validate(&plan).unwrap();
        assert_eq!(v.columns_of(j), ["id", "category", "amount", "gender"]);
        assert_eq!(v.columns_of(a), ["category", "gender", "avg_amount"]);
        assert_eq!(v.parent_of(t), Some(j));
        assert_eq!(v.parent_of(a), None);
        assert_eq!(v.order.len(), 4);
    }

    #[test]
    fn missing_columns_are_rejected() {
        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a"]);
        let f = b.filter(t, Predicate::eq("b", 1));
        assert_invalid(&b.build(f));

        let mut b = LogicalPlanBuilder::new();
        let l = b.scan("l", ["a", "k"]);
        let r = b.scan("r", ["b"]);
        let j = b.join(l, r, ["k"], JoinType::Inner);
        assert_invalid(&b.build(j));

        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a"]);
        let o = b.order_by(t, [SortKey::asc("z")]);
        assert_invalid(&b.build(o));
    }

    #[test]
    fn ambiguous_join_columns_are_rejected() {
        let mut b = LogicalPlanBuilder::new();
        let l = b.scan("l", ["k", "name"]);
        let r = b.scan("r", ["k", "name"]);
        let j = b.join(l, r, ["k"], JoinType::Inner);
        assert_invalid(&b.build(j));
    }

    #[test]
    fn shared_children_are_rejected() {
        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["k"]);
        let j = b.join(t, t, ["k"], JoinType::Inner);
        assert_invalid(&b.build(j));
    }

    #[test]
    fn unreachable_nodes_are_not_parents() {
        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a", "b"]);
        let f = b.filter(t, Predicate::eq("a", 1));
        let _unused = b.project(f, ["a"]);
        let v = validate(&b.build(f)).unwrap();
        assert_eq!(v.order, vec![t, f]);
        assert_eq!(v.parent_of(t), Some(f));
        assert_eq!(v.parent_of(f), None);

        // A dead branch may also read a node the root uses.
        let mut b = LogicalPlanBuilder::new();
        let l = b.scan("l", ["k", "x"]);
        let r = b.scan("r", ["k", "y"]);
        let _dead = b.project(l, ["x"]);
        let j = b.join(l, r, ["k"], JoinType::Inner);
        assert!(validate(&b.build(j)).is_ok());
    }

    #[test]
    fn forward_references_are_rejected() {
        let plan = LogicalPlan {
            nodes: vec![
                LogicalOp::Filter {
                    input: NodeId::new(1),
                    predicate: Predicate::eq("a", 1),
                },
                LogicalOp::Scan {
                    dataset: "t".into(),
                    columns: vec!["a".into()],
                },
            ],
            root: NodeId::new(0),
        };
        assert_invalid(&plan);

        let cyclic = LogicalPlan {
            nodes: vec![LogicalOp::Project {
                input: NodeId::new(0),
                columns: vec!["a".into()],
            }],
            root: NodeId::new(0),
        };
        assert_invalid(&cyclic);
    }

    #[test]
    fn empty_shapes_are_rejected() {
        assert_invalid(&LogicalPlan {
            nodes: vec![],
            root: NodeId::new(0),
        });

        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a", "a"]);
        assert_invalid(&b.build(t));

        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a"]);
        let f = b.filter(t, Predicate::Or(vec![]));
        assert_invalid(&b.build(f));

        let mut b = LogicalPlanBuilder::new();
        let t = b.scan("t", ["a"]);
        let a = b.aggregate(t, Vec::<String>::new(), []);
        assert_invalid(&b.build(a));
    }
}
