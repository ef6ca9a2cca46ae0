//! Column pruning: drop output columns that no ancestor reads.

use std::collections::HashSet;
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{Aggregation, Apply, JoinType, LogicalPlan, Scan};

use super::{correlated_ids, replace_children, LogicalRule};

pub struct ColumnPruner;

impl LogicalRule for ColumnPruner {
    fn name(&self) -> &'static str {
        "column_prune"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        // The root keeps every column it exposes.
        let required = plan.schema().id_set();
        prune(&plan, &required)
    }
}

fn prune(plan: &Arc<LogicalPlan>, required: &HashSet<ColumnId>) -> Result<Arc<LogicalPlan>> {
    match plan.as_ref() {
        LogicalPlan::Scan(scan) => Ok(prune_scan(plan, scan, required)),
        LogicalPlan::Selection { input, conditions } => {
            let mut need = required.clone();
            for c in conditions {
                need.extend(c.column_ids());
            }
            let input = prune(input, &need)?;
            Ok(replace_children(plan, vec![input]))
        }
        LogicalPlan::Projection {
            input,
            exprs,
            schema,
        } => {
            let mut keep: Vec<usize> = (0..exprs.len())
                .filter(|&i| required.contains(&schema.fields[i].id))
                .collect();
            if keep.is_empty() && !exprs.is_empty() {
                keep.push(0);
            }
            let mut need = HashSet::new();
            for &i in &keep {
                need.extend(exprs[i].column_ids());
            }
            let new_input = prune(input, &need)?;
            if keep.len() == exprs.len() {
                return Ok(replace_children(plan, vec![new_input]));
            }
            let mut new_schema = schema.clone();
            let kept_ids: HashSet<ColumnId> = keep.iter().map(|&i| schema.fields[i].id).collect();
            new_schema.retain(|id| kept_ids.contains(&id));
            Ok(Arc::new(LogicalPlan::Projection {
                input: new_input,
                exprs: keep.iter().map(|&i| exprs[i].clone()).collect(),
                schema: new_schema,
            }))
        }
        LogicalPlan::Join(join) => {
            let mut need = required.clone();
            for c in join.all_conditions() {
                need.extend(c.column_ids());
            }
            for (l, r) in &join.equal_conditions {
                need.insert(l.id);
                need.insert(r.id);
            }
            let left_ids = join.left.schema().id_set();
            let right_ids = join.right.schema().id_set();
            let left_need: HashSet<ColumnId> = need.intersection(&left_ids).copied().collect();
            let right_need: HashSet<ColumnId> = match join.join_type {
                // The right side of a semi join only feeds its conditions.
                JoinType::Semi | JoinType::AntiSemi => {
                    let mut cond_need: HashSet<ColumnId> = HashSet::new();
                    for c in join.all_conditions() {
                        cond_need.extend(c.column_ids());
                    }
                    for (_, r) in &join.equal_conditions {
                        cond_need.insert(r.id);
                    }
                    cond_need.intersection(&right_ids).copied().collect()
                }
                _ => need.intersection(&right_ids).copied().collect(),
            };
            let left = prune(&join.left, &left_need)?;
            let right = prune(&join.right, &right_need)?;
            Ok(replace_children(plan, vec![left, right]))
        }
        LogicalPlan::Aggregation(agg) => prune_aggregation(plan, agg, required),
        LogicalPlan::Sort { input, by } | LogicalPlan::TopN { input, by, .. } => {
            let mut need = required.clone();
            for item in by {
                need.extend(item.expr.column_ids());
            }
            let input = prune(input, &need)?;
            Ok(replace_children(plan, vec![input]))
        }
        LogicalPlan::Limit { input, .. } => {
            let input = prune(input, required)?;
            Ok(replace_children(plan, vec![input]))
        }
        LogicalPlan::Apply(apply) => prune_apply(plan, apply, required),
    }
}

fn prune_scan(plan: &Arc<LogicalPlan>, scan: &Scan, required: &HashSet<ColumnId>) -> Arc<LogicalPlan> {
    let mut need = required.clone();
    for f in &scan.filters {
        need.extend(f.column_ids());
    }
    let mut keep: HashSet<ColumnId> = scan
        .schema
        .fields
        .iter()
        .filter(|f| need.contains(&f.id))
        .map(|f| f.id)
        .collect();
    if keep.is_empty() {
        if let Some(first) = scan.schema.fields.first() {
            keep.insert(first.id);
        }
    }
    if keep.len() == scan.schema.len() {
        return plan.clone();
    }
    let mut new_scan = scan.clone();
    new_scan.schema.retain(|id| keep.contains(&id));
    Arc::new(LogicalPlan::Scan(new_scan))
}

fn prune_aggregation(
    plan: &Arc<LogicalPlan>,
    agg: &Aggregation,
    required: &HashSet<ColumnId>,
) -> Result<Arc<LogicalPlan>> {
    let mut keep: Vec<usize> = (0..agg.aggs.len())
        .filter(|&i| required.contains(&agg.schema.fields[i].id))
        .collect();
    // An aggregation must still produce something to count its groups by.
    if keep.is_empty() && !agg.aggs.is_empty() {
        keep.push(0);
    }
    let mut need = HashSet::new();
    for g in &agg.group_by {
        need.extend(g.column_ids());
    }
    for &i in &keep {
        need.extend(agg.aggs[i].column_ids());
    }
    let input = prune(&agg.input, &need)?;
    if keep.len() == agg.aggs.len() {
        return Ok(replace_children(plan, vec![input]));
    }
    let kept_ids: HashSet<ColumnId> = keep.iter().map(|&i| agg.schema.fields[i].id).collect();
    let mut schema = agg.schema.clone();
    schema.retain(|id| kept_ids.contains(&id));
    Ok(Arc::new(LogicalPlan::Aggregation(Aggregation {
        input,
        group_by: agg.group_by.clone(),
        aggs: keep.iter().map(|&i| agg.aggs[i].clone()).collect(),
        schema,
    })))
}

fn prune_apply(plan: &Arc<LogicalPlan>, apply: &Apply, required: &HashSet<ColumnId>) -> Result<Arc<LogicalPlan>> {
    let mut cond_need = HashSet::new();
    for c in &apply.conditions {
        cond_need.extend(c.column_ids());
    }
    let outer_ids = apply.outer.schema().id_set();
    let inner_ids = apply.inner.schema().id_set();

    // Columns read by correlated references inside the inner side are
    // consumed by the apply itself, so the outer side keeps them.
    let mut outer_need: HashSet<ColumnId> = required
        .union(&cond_need)
        .filter(|id| outer_ids.contains(id))
        .copied()
        .collect();
    outer_need.extend(
        correlated_ids(&apply.inner)
            .into_iter()
            .filter(|id| outer_ids.contains(id)),
    );

    let inner_need: HashSet<ColumnId> = match apply.join_type {
        JoinType::Semi | JoinType::AntiSemi => cond_need
            .iter()
            .filter(|id| inner_ids.contains(id))
            .copied()
            .collect(),
        _ => required
            .union(&cond_need)
            .filter(|id| inner_ids.contains(id))
            .copied()
            .collect(),
    };

    let outer = prune(&apply.outer, &outer_need)?;
    let inner = prune(&apply.inner, &inner_need)?;
    Ok(replace_children(plan, vec![outer, inner]))
}
