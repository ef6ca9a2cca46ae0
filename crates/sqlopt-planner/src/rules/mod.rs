//! Logical rewrite rules and the bitmask-driven pipeline that runs them.
//!
//! The catalog order is fixed. Bit *i* of the `RuleFlags` mask enables the
//! *i*-th rule; enabled rules always run in catalog order no matter how the
//! mask was written.

use std::collections::HashSet;
use std::sync::Arc;

use sqlopt_core::config::RuleFlags;
use sqlopt_core::error::Result;
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::LogicalPlan;
use tracing::{debug, trace};

mod aggregation_optimize;
mod build_key_info;
mod column_pruning;
mod decorrelate;
mod eliminate_projection;
mod max_min_eliminate;
mod predicate_push_down;
mod topn_push_down;

pub use aggregation_optimize::AggregationOptimizer;
pub use build_key_info::KeyInfoBuilder;
pub use column_pruning::ColumnPruner;
pub use decorrelate::Decorrelator;
pub use eliminate_projection::ProjectionEliminator;
pub use max_min_eliminate::MaxMinEliminator;
pub use predicate_push_down::PredicatePushDown;
pub use topn_push_down::TopNPushDown;

/// A logical rewrite. Must be a pure function of its input tree.
pub trait LogicalRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>>;
}

/// The rule catalog, in application order.
pub static RULES: [&dyn LogicalRule; 8] = [
    &ColumnPruner,
    &ProjectionEliminator,
    &KeyInfoBuilder,
    &Decorrelator,
    &MaxMinEliminator,
    &PredicatePushDown,
    &AggregationOptimizer,
    &TopNPushDown,
];

/// Apply every catalog rule whose bit is set in `flags`.
pub fn logical_optimize(flags: RuleFlags, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
    let mut plan = plan;
    for (i, rule) in RULES.iter().enumerate() {
        if flags.bits() & (1u8 << i) == 0 {
            trace!(rule = rule.name(), "rule disabled");
            continue;
        }
        debug!(rule = rule.name(), "applying logical rule");
        plan = rule
            .optimize(plan)
            .map_err(|e| e.with_context(format!("logical rule '{}'", rule.name())))?;
        trace!(rule = rule.name(), plan = %plan.explain(), "after rule");
    }
    Ok(plan)
}

/// Rebuild `plan` over `children`, reusing the node when nothing changed.
pub(crate) fn replace_children(
    plan: &Arc<LogicalPlan>,
    children: Vec<Arc<LogicalPlan>>,
) -> Arc<LogicalPlan> {
    let unchanged = plan
        .children()
        .iter()
        .zip(children.iter())
        .all(|(old, new)| Arc::ptr_eq(old, new));
    if unchanged {
        plan.clone()
    } else {
        Arc::new(plan.with_children(children))
    }
}

/// Outer column ids referenced anywhere in the subtree.
pub(crate) fn correlated_ids(plan: &LogicalPlan) -> HashSet<ColumnId> {
    let mut out = HashSet::new();
    plan.visit(&mut |node| {
        for e in node.expressions() {
            out.extend(e.correlated_ids());
        }
    });
    out
}

/// Wrap `plan` in a selection unless there is nothing to filter.
pub(crate) fn add_selection(
    plan: Arc<LogicalPlan>,
    conditions: Vec<sqlopt_core::expr::Expr>,
) -> Arc<LogicalPlan> {
    if conditions.is_empty() {
        plan
    } else {
        Arc::new(LogicalPlan::Selection {
            input: plan,
            conditions,
        })
    }
}
