//! Logical → physical optimization.
//!
//! Optimization runs in two phases:
//!
//! 1. **Analysis** (fallible, no side effects): validate the plan, resolve
//!    scan statistics and dataset versions, fingerprint every node, count how
//!    often each fingerprint occurs and derive output estimates bottom-up.
//! 2. **Emission** (infallible): walk from the root, replacing subtrees that
//!    are already cached with a `CachedRead`, and otherwise picking join,
//!    aggregate and sort strategies, partitioning and cache hints.
//!
//! Cache lookups pin entries, so they only happen in phase 2. Any error
//! therefore surfaces before a single reference count changes.

use std::collections::{HashMap, HashSet};

use planwise_core::cache::{CacheHint, MaterializationCache};
use planwise_core::config::OptimizerConfig;
use planwise_core::dag::{
    AggregateStrategy, BuildSide, JoinStrategy, LogicalOp, LogicalPlan, OperatorKind,
    PartitionSpec, PhysicalNode, PhysicalOp, PhysicalPlan, SortStrategy,
};
use planwise_core::error::{Error, Result};
use planwise_core::hash::PlanFingerprint;
use planwise_core::id::NodeId;
use planwise_core::stats::{OutputEstimate, StatisticsSource};

use crate::cardinality;
use crate::fingerprint::{fingerprint_node, reuse_counts, UNKNOWN_DATASET_VERSION};
use crate::join::JoinStrategySelector;
use crate::partition::PartitionAdvisor;
use crate::validate::{validate, ValidatedPlan};

/// Optimize `plan` into an annotated physical plan.
///
/// Errors (`InvalidPlan`, `UnknownDataset`, `Config`) leave the cache
/// untouched. On success every `CacheHint::Reuse` in the result holds a
/// reference that the caller must release after execution.
pub fn optimize(
    plan: &LogicalPlan,
    stats: &dyn StatisticsSource,
    cache: &dyn MaterializationCache,
    advisor: &PartitionAdvisor,
    selector: &JoinStrategySelector,
    config: &OptimizerConfig,
) -> Result<PhysicalPlan> {
    config.validate()?;
    let analysis = analyze(plan, stats, config)?;

    let mut emitter = Emitter {
        plan,
        analysis: &analysis,
        cache,
        advisor,
        selector,
        config,
        nodes: Vec::with_capacity(plan.len()),
        marked: HashSet::new(),
    };
    let root = emitter.emit(plan.root);
    let physical = PhysicalPlan {
        nodes: emitter.nodes,
        root,
    };

    let hits = physical.pinned_fingerprints().len();
    let materialize = physical.materialization_targets().len();
    tracing::info!(
        logical_nodes = plan.len(),
        physical_nodes = physical.len(),
        cache_hits = hits,
        materialize,
        "plan optimized"
    );
    Ok(physical)
}

/// Bundles the optimizer's collaborators for repeated use.
pub struct Optimizer<'a> {
    stats: &'a dyn StatisticsSource,
    cache: &'a dyn MaterializationCache,
    advisor: PartitionAdvisor,
    selector: JoinStrategySelector,
    config: OptimizerConfig,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        stats: &'a dyn StatisticsSource,
        cache: &'a dyn MaterializationCache,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            stats,
            cache,
            advisor: PartitionAdvisor::from_config(&config),
            selector: JoinStrategySelector::new(),
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(&self, plan: &LogicalPlan) -> Result<PhysicalPlan> {
        optimize(
            plan,
            self.stats,
            self.cache,
            &self.advisor,
            &self.selector,
            &self.config,
        )
    }
}

/// Everything phase 1 learns about the logical plan, indexed by arena slot.
struct Analysis {
    validated: ValidatedPlan,
    fingerprints: Vec<Option<PlanFingerprint>>,
    estimates: Vec<Option<OutputEstimate>>,
    reuse: HashMap<PlanFingerprint, u32>,
}

impl Analysis {
    fn fingerprint(&self, id: NodeId) -> Option<PlanFingerprint> {
        self.fingerprints.get(id.index()).copied().flatten()
    }

    fn estimate(&self, id: NodeId) -> Option<&OutputEstimate> {
        self.estimates.get(id.index()).and_then(Option::as_ref)
    }

    fn reuse_of(&self, fp: &PlanFingerprint) -> u32 {
        self.reuse.get(fp).copied().unwrap_or(0)
    }
}

fn analyze(
    plan: &LogicalPlan,
    stats: &dyn StatisticsSource,
    config: &OptimizerConfig,
) -> Result<Analysis> {
    let validated = validate(plan)?;
    let mut fingerprints: Vec<Option<PlanFingerprint>> = vec![None; plan.len()];
    let mut estimates: Vec<Option<OutputEstimate>> = vec![None; plan.len()];

    for &id in &validated.order {
        let op = &plan.nodes[id.index()];
        let children = op.children();

        let mut version = UNKNOWN_DATASET_VERSION;
        let estimate = match op {
            LogicalOp::Scan { dataset, columns } => {
                match (stats.estimate(dataset), stats.dataset_version(dataset)) {
                    (Ok(s), Ok(v)) => {
                        version = v;
                        Some(cardinality::scan_estimate(&s, columns))
                    }
                    (Err(Error::UnknownDataset(_)), _) | (_, Err(Error::UnknownDataset(_)))
                        if config.allow_unknown_statistics =>
                    {
                        tracing::warn!(dataset, "no statistics; planning without estimates");
                        None
                    }
                    (Err(e), _) | (_, Err(e)) => return Err(e),
                }
            }
            _ => derive_estimate(op, &validated, &estimates, config),
        };

        let child_fps = children
            .iter()
            .map(|c| {
                fingerprints[c.index()]
                    .ok_or_else(|| Error::Invariant(format!("{c} visited after its parent")))
            })
            .collect::<Result<Vec<_>>>()?;
        fingerprints[id.index()] = Some(fingerprint_node(op, &child_fps, version)?);
        estimates[id.index()] = estimate;
    }

    // Emission only ever walks these nodes and their reachable parents.
    if let Some(id) = validated
        .order
        .iter()
        .find(|id| fingerprints[id.index()].is_none())
    {
        return Err(Error::Invariant(format!("{id} was not fingerprinted")));
    }

    let reuse = reuse_counts(fingerprints.iter().flatten());
    Ok(Analysis {
        validated,
        fingerprints,
        estimates,
        reuse,
    })
}

/// Estimate for a non-scan node; `None` if any input is unknown.
fn derive_estimate(
    op: &LogicalOp,
    validated: &ValidatedPlan,
    estimates: &[Option<OutputEstimate>],
    config: &OptimizerConfig,
) -> Option<OutputEstimate> {
    let est = |id: &NodeId| estimates[id.index()].as_ref();
    match op {
        LogicalOp::Scan { .. } => None,
        LogicalOp::Filter { input, predicate } => {
            Some(cardinality::estimate_filter(est(input)?, predicate, config))
        }
        LogicalOp::Join { left, right, .. } => {
            Some(cardinality::estimate_join(est(left)?, est(right)?, config))
        }
        LogicalOp::Aggregate {
            input,
            group_by,
            aggs,
        } => Some(cardinality::estimate_aggregate(
            est(input)?,
            validated.columns_of(*input).len(),
            group_by,
            aggs,
        )),
        LogicalOp::OrderBy { input, .. } => Some(cardinality::estimate_order_by(est(input)?)),
        LogicalOp::Project { input, columns } => Some(cardinality::estimate_project(
            est(input)?,
            validated.columns_of(*input).len(),
            columns,
        )),
    }
}

struct Emitter<'a> {
    plan: &'a LogicalPlan,
    analysis: &'a Analysis,
    cache: &'a dyn MaterializationCache,
    advisor: &'a PartitionAdvisor,
    selector: &'a JoinStrategySelector,
    config: &'a OptimizerConfig,
    nodes: Vec<PhysicalNode>,
    /// Fingerprints already given a `Materialize` hint in this plan.
    marked: HashSet<PlanFingerprint>,
}

impl Emitter<'_> {
    fn push(&mut self, node: PhysicalNode) -> NodeId {
        self.nodes.push(node);
        NodeId::new((self.nodes.len() - 1) as u64)
    }

    fn spec_of(&self, id: NodeId) -> PartitionSpec {
        self.nodes
            .get(id.index())
            .map(|n| n.partition_spec.clone())
            .unwrap_or_else(|| PartitionSpec::round_robin(self.config.default_shuffle_partitions))
    }

    /// Phase 1 fingerprinted every reachable node, so the default is never
    /// taken for a node `emit` visits.
    fn fp(&self, id: NodeId) -> PlanFingerprint {
        self.analysis.fingerprint(id).unwrap_or_default()
    }

    fn emit(&mut self, id: NodeId) -> NodeId {
        let plan = self.plan;
        let op = &plan.nodes[id.index()];
        let fp = self.fp(id);
        let estimate = self.analysis.estimate(id).cloned();
        let columns = self.analysis.validated.columns_of(id).to_vec();

        // A resident result replaces the whole subtree.
        if op.kind() != OperatorKind::Scan {
            if let Some(entry) = self.cache.lookup(&fp) {
                tracing::debug!(fingerprint = %fp.short(), size = entry.size_bytes, "cache hit");
                let estimate = Some(OutputEstimate {
                    bytes: entry.size_bytes,
                    broadcast_unsafe: false,
                    ..estimate.unwrap_or_default()
                });
                let partition_spec =
                    self.advisor
                        .advise(op.kind(), &[], estimate.as_ref(), self.config);
                return self.push(PhysicalNode {
                    op: PhysicalOp::CachedRead {
                        handle: entry.materialized_handle,
                        kind: op.kind(),
                        columns,
                    },
                    logical: id,
                    fingerprint: fp,
                    partition_spec,
                    cache_hint: Some(CacheHint::Reuse(entry)),
                    estimate,
                });
            }
        }

        let (op, partition_spec) = match op {
            LogicalOp::Scan { dataset, columns } => (
                PhysicalOp::Scan {
                    dataset: dataset.clone(),
                    columns: columns.clone(),
                },
                self.advisor
                    .advise(OperatorKind::Scan, &[], estimate.as_ref(), self.config),
            ),
            LogicalOp::Filter { input, predicate } => {
                let child = self.emit(*input);
                (
                    PhysicalOp::Filter {
                        input: child,
                        predicate: predicate.clone(),
                    },
                    self.spec_of(child),
                )
            }
            LogicalOp::Project { input, columns } => {
                let child = self.emit(*input);
                let mut spec = self.spec_of(child);
                if !spec.key_columns.iter().all(|k| columns.contains(k)) {
                    spec.key_columns.clear();
                }
                (
                    PhysicalOp::Project {
                        input: child,
                        columns: columns.clone(),
                    },
                    spec,
                )
            }
            LogicalOp::Join {
                left,
                right,
                keys,
                join_type,
            } => {
                let l = self.emit(*left);
                let r = self.emit(*right);
                let strategy = self.selector.choose(
                    *join_type,
                    self.nodes[l.index()].estimate.as_ref(),
                    self.nodes[r.index()].estimate.as_ref(),
                    self.config,
                );
                let spec = match strategy {
                    JoinStrategy::Broadcast { side } => {
                        // Output keeps the streamed side's layout.
                        let streamed = match side {
                            BuildSide::Left => r,
                            BuildSide::Right => l,
                        };
                        let mut spec = self.spec_of(streamed);
                        if !spec.key_columns.iter().all(|k| keys.contains(k)) {
                            spec.key_columns.clear();
                        }
                        spec
                    }
                    JoinStrategy::ShuffleHash => {
                        let combined = combine(
                            self.nodes[l.index()].estimate.as_ref(),
                            self.nodes[r.index()].estimate.as_ref(),
                        );
                        self.advisor
                            .advise(OperatorKind::Join, keys, combined.as_ref(), self.config)
                    }
                };
                tracing::debug!(logical = %id, ?strategy, partitions = spec.count, "join planned");
                (
                    PhysicalOp::Join {
                        left: l,
                        right: r,
                        keys: keys.clone(),
                        join_type: *join_type,
                        strategy,
                    },
                    spec,
                )
            }
            LogicalOp::Aggregate {
                input,
                group_by,
                aggs,
            } => {
                let child = self.emit(*input);
                let child_spec = self.spec_of(child);
                let already_grouped = !group_by.is_empty()
                    && !child_spec.key_columns.is_empty()
                    && child_spec.key_columns.iter().all(|k| group_by.contains(k));
                let (strategy, spec) = if already_grouped {
                    (AggregateStrategy::PartitionLocal, child_spec)
                } else {
                    let spec = self.advisor.advise(
                        OperatorKind::Aggregate,
                        group_by,
                        self.nodes[child.index()].estimate.as_ref(),
                        self.config,
                    );
                    (AggregateStrategy::ShuffleHash, spec)
                };
                (
                    PhysicalOp::Aggregate {
                        input: child,
                        group_by: group_by.clone(),
                        aggs: aggs.clone(),
                        strategy,
                    },
                    spec,
                )
            }
            LogicalOp::OrderBy { input, keys } => {
                let child = self.emit(*input);
                let sort_columns: Vec<String> = keys.iter().map(|k| k.column.clone()).collect();
                let spec = self.advisor.advise(
                    OperatorKind::OrderBy,
                    &sort_columns,
                    self.nodes[child.index()].estimate.as_ref(),
                    self.config,
                );
                let strategy = if spec.count == 1 {
                    SortStrategy::SinglePartition
                } else {
                    SortStrategy::RangePartitioned
                };
                (
                    PhysicalOp::OrderBy {
                        input: child,
                        keys: keys.clone(),
                        strategy,
                    },
                    spec,
                )
            }
        };

        let cache_hint = self.cache_hint(id, fp, estimate.as_ref());
        self.push(PhysicalNode {
            op,
            logical: id,
            fingerprint: fp,
            partition_spec,
            cache_hint,
            estimate,
        })
    }

    /// Only the top-most node of a repeated subtree is a candidate: its
    /// parent must occur fewer times than it does. Scans are never cached
    /// and unknown sizes are never admitted.
    fn cache_hint(
        &mut self,
        id: NodeId,
        fp: PlanFingerprint,
        estimate: Option<&OutputEstimate>,
    ) -> Option<CacheHint> {
        if self.plan.nodes[id.index()].kind() == OperatorKind::Scan {
            return None;
        }
        let reuse = self.analysis.reuse_of(&fp);
        let parent_reuse = self
            .analysis
            .validated
            .parent_of(id)
            .and_then(|p| self.analysis.fingerprint(p))
            .map(|p| self.analysis.reuse_of(&p))
            .unwrap_or(0);
        if reuse <= parent_reuse {
            return None;
        }

        if self.marked.contains(&fp) {
            return Some(CacheHint::ReusePending { fingerprint: fp });
        }
        let bytes = estimate?.bytes;
        if !self.cache.should_cache(&fp, reuse, bytes, self.config) {
            return None;
        }
        self.marked.insert(fp);
        tracing::debug!(fingerprint = %fp.short(), reuse, bytes, "marked for materialization");
        Some(CacheHint::Materialize {
            fingerprint: fp,
            reuse_count: reuse,
            estimated_bytes: bytes,
        })
    }
}

/// Total input to a shuffle join: both sides are repartitioned.
fn combine(l: Option<&OutputEstimate>, r: Option<&OutputEstimate>) -> Option<OutputEstimate> {
    let (l, r) = (l?, r?);
    Some(OutputEstimate {
        rows: l.rows.saturating_add(r.rows),
        bytes: l.bytes.saturating_add(r.bytes),
        distinct_counts: Default::default(),
        broadcast_unsafe: l.broadcast_unsafe || r.broadcast_unsafe,
    })
}
