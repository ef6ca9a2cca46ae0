//! Predicate push-down.
//!
//! Conditions travel toward the scans. A condition that cannot pass a node
//! stays in a selection directly above it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::{AggFunc, ColumnRef, Expr};
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{Aggregation, Apply, Join, JoinType, LogicalPlan};

use super::{add_selection, replace_children, LogicalRule};

pub struct PredicatePushDown;

impl LogicalRule for PredicatePushDown {
    fn name(&self) -> &'static str {
        "predicate_push_down"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(push(&plan, Vec::new()))
    }
}

/// Push `preds` into `plan`; the result filters by all of them.
fn push(plan: &Arc<LogicalPlan>, preds: Vec<Expr>) -> Arc<LogicalPlan> {
    match plan.as_ref() {
        LogicalPlan::Scan(scan) => {
            if preds.is_empty() {
                return plan.clone();
            }
            let mut scan = scan.clone();
            for p in preds {
                if !scan.filters.contains(&p) {
                    scan.filters.push(p);
                }
            }
            Arc::new(LogicalPlan::Scan(scan))
        }
        LogicalPlan::Selection { input, conditions } => {
            let mut all = preds;
            for c in conditions {
                all.extend(c.clone().split_conjunction());
            }
            push(input, all)
        }
        LogicalPlan::Projection {
            input,
            exprs,
            schema,
        } => {
            let map: HashMap<ColumnId, Expr> = schema
                .fields
                .iter()
                .zip(exprs.iter())
                .map(|(f, e)| (f.id, e.clone()))
                .collect();
            let lowered = preds.iter().map(|p| p.substitute(&map)).collect();
            let input = push(input, lowered);
            replace_children(plan, vec![input])
        }
        LogicalPlan::Join(join) => push_join(join, preds),
        LogicalPlan::Aggregation(agg) => push_aggregation(plan, agg, preds),
        LogicalPlan::Sort { input, .. } => {
            let input = push(input, preds);
            replace_children(plan, vec![input])
        }
        // Filtering before a limit changes which rows survive.
        LogicalPlan::Limit { input, .. } | LogicalPlan::TopN { input, .. } => {
            let input = push(input, Vec::new());
            add_selection(replace_children(plan, vec![input]), preds)
        }
        LogicalPlan::Apply(apply) => push_apply(plan, apply, preds),
    }
}

fn push_join(join: &Join, preds: Vec<Expr>) -> Arc<LogicalPlan> {
    let left_ids = join.left.schema().id_set();
    let right_ids = join.right.schema().id_set();

    // An upper condition that rejects NULLs on the null-supplying side
    // makes the outer join an inner one.
    let join_type = match join.join_type {
        JoinType::LeftOuter if preds.iter().any(|p| p.is_null_rejecting(&right_ids)) => JoinType::Inner,
        JoinType::RightOuter if preds.iter().any(|p| p.is_null_rejecting(&left_ids)) => JoinType::Inner,
        other => other,
    };

    let mut equal = join.equal_conditions.clone();
    let mut left_push = Vec::new();
    let mut right_push = Vec::new();
    let mut left_keep = Vec::new();
    let mut right_keep = Vec::new();
    let mut other = Vec::new();
    let mut above = Vec::new();

    match join_type {
        JoinType::Inner => {
            let all = preds
                .into_iter()
                .chain(join.left_conditions.iter().cloned())
                .chain(join.right_conditions.iter().cloned())
                .chain(join.other_conditions.iter().cloned());
            for cond in all {
                if let Some((l, r)) = cond.as_column_equality() {
                    if left_ids.contains(&l.id) && right_ids.contains(&r.id) {
                        push_pair(&mut equal, l.clone(), r.clone());
                        continue;
                    }
                    if right_ids.contains(&l.id) && left_ids.contains(&r.id) {
                        push_pair(&mut equal, r.clone(), l.clone());
                        continue;
                    }
                }
                match side_of(&cond, &left_ids, &right_ids) {
                    Side::Left => left_push.push(cond),
                    Side::Right => right_push.push(cond),
                    Side::Both => other.push(cond),
                }
            }
        }
        JoinType::LeftOuter | JoinType::RightOuter => {
            let (preserved_ids, preserved_push, null_push, preserved_keep) =
                if join_type == JoinType::LeftOuter {
                    (&left_ids, &mut left_push, &mut right_push, &mut left_keep)
                } else {
                    (&right_ids, &mut right_push, &mut left_push, &mut right_keep)
                };
            for p in preds {
                let cols = p.column_ids();
                if !cols.is_empty() && cols.is_subset(preserved_ids) {
                    preserved_push.push(p);
                } else {
                    above.push(p);
                }
            }
            // ON conditions only filter the null-supplying side; the ones on
            // the preserved side decide matches and stay in the join.
            let (preserved_on, null_on) = if join_type == JoinType::LeftOuter {
                (&join.left_conditions, &join.right_conditions)
            } else {
                (&join.right_conditions, &join.left_conditions)
            };
            null_push.extend(null_on.iter().cloned());
            preserved_keep.extend(preserved_on.iter().cloned());
            other.extend(join.other_conditions.iter().cloned());
        }
        JoinType::Semi | JoinType::AntiSemi => {
            left_push.extend(preds);
            right_push.extend(join.right_conditions.iter().cloned());
            if join_type == JoinType::Semi {
                left_push.extend(join.left_conditions.iter().cloned());
            } else {
                left_keep.extend(join.left_conditions.iter().cloned());
            }
            other.extend(join.other_conditions.iter().cloned());
        }
    }

    let left = push(&join.left, left_push);
    let right = push(&join.right, right_push);
    let mut new_join = join.rebuild(left, right, join_type);
    new_join.equal_conditions = equal;
    new_join.left_conditions = left_keep;
    new_join.right_conditions = right_keep;
    new_join.other_conditions = other;
    add_selection(Arc::new(LogicalPlan::Join(new_join)), above)
}

fn push_pair(equal: &mut Vec<(ColumnRef, ColumnRef)>, l: ColumnRef, r: ColumnRef) {
    if !equal.iter().any(|(a, b)| a.id == l.id && b.id == r.id) {
        equal.push((l, r));
    }
}

enum Side {
    Left,
    Right,
    Both,
}

fn side_of(cond: &Expr, left: &HashSet<ColumnId>, right: &HashSet<ColumnId>) -> Side {
    let cols = cond.column_ids();
    if cols.is_subset(left) {
        Side::Left
    } else if cols.is_subset(right) {
        Side::Right
    } else {
        Side::Both
    }
}

fn push_aggregation(plan: &Arc<LogicalPlan>, agg: &Aggregation, preds: Vec<Expr>) -> Arc<LogicalPlan> {
    // Output columns that carry a group-by column, mapped back to it.
    let group_ids: HashSet<ColumnId> = agg
        .group_by
        .iter()
        .filter_map(|g| g.as_column().map(|c| c.id))
        .collect();
    let mut map: HashMap<ColumnId, Expr> = HashMap::new();
    for (call, field) in agg.aggs.iter().zip(agg.schema.fields.iter()) {
        if call.func != AggFunc::FirstRow {
            continue;
        }
        if let Some(arg) = call.args.first().and_then(Expr::as_column) {
            if group_ids.contains(&arg.id) {
                map.insert(field.id, Expr::Column(arg.clone()));
            }
        }
    }

    let mut below = Vec::new();
    let mut above = Vec::new();
    for p in preds {
        let cols = p.column_ids();
        if !agg.group_by.is_empty() && !cols.is_empty() && cols.iter().all(|c| map.contains_key(c)) {
            below.push(p.substitute(&map));
        } else {
            above.push(p);
        }
    }
    let input = push(&agg.input, below);
    add_selection(replace_children(plan, vec![input]), above)
}

fn push_apply(plan: &Arc<LogicalPlan>, apply: &Apply, preds: Vec<Expr>) -> Arc<LogicalPlan> {
    let outer_ids = apply.outer.schema().id_set();
    let mut below = Vec::new();
    let mut above = Vec::new();
    for p in preds {
        let cols = p.column_ids();
        if !cols.is_empty() && cols.is_subset(&outer_ids) {
            below.push(p);
        } else {
            above.push(p);
        }
    }
    let outer = push(&apply.outer, below);
    let inner = push(&apply.inner, Vec::new());
    add_selection(replace_children(plan, vec![outer, inner]), above)
}
