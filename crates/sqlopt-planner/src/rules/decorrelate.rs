//! Decorrelation of `Apply` nodes.
//!
//! Correlated inner selections are pulled into the apply's conditions.
//! Inner projections that only pass columns through are removed; renaming
//! or computing ones are lifted above the apply. Once the inner side no
//! longer references the outer side the apply becomes a join. A left-outer
//! apply over a scalar aggregate becomes an aggregation over a left-outer
//! apply, grouped by a unique key of the outer side.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::{AggCall, Expr};
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{Aggregation, Apply, Join, JoinType, LogicalPlan};
use sqlopt_core::schema::Schema;
use tracing::debug;

use super::{correlated_ids, replace_children, LogicalRule};

pub struct Decorrelator;

impl LogicalRule for Decorrelator {
    fn name(&self) -> &'static str {
        "decorrelate"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(decorrelate(&plan))
    }
}

fn decorrelate(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let children: Vec<Arc<LogicalPlan>> = plan.children().into_iter().map(decorrelate).collect();
    let plan = replace_children(plan, children);
    let rewritten = match plan.as_ref() {
        LogicalPlan::Apply(apply) => rewrite_apply(apply.clone()),
        _ => None,
    };
    rewritten.unwrap_or(plan)
}

/// Rewrite one apply whose children are already decorrelated. `None` when
/// nothing applies.
fn rewrite_apply(mut apply: Apply) -> Option<Arc<LogicalPlan>> {
    let mut changed = false;
    loop {
        let outer_ids = apply.outer.schema().id_set();
        let inner_refs = correlated_ids(&apply.inner);
        if inner_refs.is_disjoint(&outer_ids) {
            debug!(join_type = apply.join_type.name(), "apply turned into join");
            return Some(Arc::new(LogicalPlan::Join(to_join(&apply, &outer_ids))));
        }

        let next = match apply.inner.as_ref() {
            LogicalPlan::Selection { input, conditions } => {
                let mut conds = apply.conditions.clone();
                conds.extend(conditions.iter().map(|c| c.decorrelate(&outer_ids)));
                let mut next = apply.rebuild(apply.outer.clone(), input.clone());
                next.conditions = conds;
                Some(next)
            }
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } if exprs.iter().all(|e| e.as_column().is_some()) => {
                if keeps_ids(exprs, schema) {
                    Some(apply.rebuild(apply.outer.clone(), input.clone()))
                } else {
                    return Some(lift_projection(&apply, input, exprs, schema));
                }
            }
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } if matches!(apply.join_type, JoinType::Inner | JoinType::Semi | JoinType::AntiSemi)
                && !exprs.iter().any(Expr::has_correlated) =>
            {
                return Some(lift_projection(&apply, input, exprs, schema));
            }
            LogicalPlan::Aggregation(agg) => {
                return scalar_agg_to_join(&apply, agg).or_else(|| {
                    changed.then(|| Arc::new(LogicalPlan::Apply(apply.clone())))
                });
            }
            _ => None,
        };
        match next {
            Some(n) => {
                apply = n;
                changed = true;
            }
            None => break,
        }
    }
    changed.then(|| Arc::new(LogicalPlan::Apply(apply)))
}

fn to_join(apply: &Apply, outer_ids: &HashSet<ColumnId>) -> Join {
    let inner_ids = apply.inner.schema().id_set();
    let mut join = Join::new(apply.outer.clone(), apply.inner.clone(), apply.join_type);
    for cond in &apply.conditions {
        let cond = cond.decorrelate(outer_ids);
        if let Some((l, r)) = cond.as_column_equality() {
            if outer_ids.contains(&l.id) && inner_ids.contains(&r.id) {
                join.equal_conditions.push((l.clone(), r.clone()));
                continue;
            }
            if outer_ids.contains(&r.id) && inner_ids.contains(&l.id) {
                join.equal_conditions.push((r.clone(), l.clone()));
                continue;
            }
        }
        let cols = cond.column_ids();
        if !cols.is_empty() && cols.is_subset(outer_ids) {
            join.left_conditions.push(cond);
        } else if !cols.is_empty() && cols.is_subset(&inner_ids) {
            join.right_conditions.push(cond);
        } else {
            join.other_conditions.push(cond);
        }
    }
    join
}

/// True when every output column of a column-only projection is the input
/// column it reads.
fn keeps_ids(exprs: &[Expr], schema: &Schema) -> bool {
    schema
        .fields
        .iter()
        .zip(exprs.iter())
        .all(|(f, e)| e.as_column().map(|c| c.id) == Some(f.id))
}

/// Apply over a projection: the apply reads the projection's input directly
/// and the projected columns are evaluated above it. Semi and anti-semi
/// applies expose no inner columns, so nothing is re-established.
fn lift_projection(
    apply: &Apply,
    input: &Arc<LogicalPlan>,
    exprs: &[Expr],
    schema: &Schema,
) -> Arc<LogicalPlan> {
    let map: HashMap<ColumnId, Expr> = schema
        .fields
        .iter()
        .zip(exprs.iter())
        .map(|(f, e)| (f.id, e.clone()))
        .collect();
    let mut lowered = apply.rebuild(apply.outer.clone(), input.clone());
    lowered.conditions = apply.conditions.iter().map(|c| c.substitute(&map)).collect();
    let lowered = rewrite_apply(lowered.clone()).unwrap_or_else(|| Arc::new(LogicalPlan::Apply(lowered)));
    if matches!(apply.join_type, JoinType::Semi | JoinType::AntiSemi) {
        return lowered;
    }

    let out_exprs: Vec<Expr> = apply
        .schema
        .fields
        .iter()
        .map(|f| map.get(&f.id).cloned().unwrap_or_else(|| Expr::Column(f.column_ref())))
        .collect();
    debug!("projection lifted above apply");
    Arc::new(LogicalPlan::Projection {
        input: lowered,
        exprs: out_exprs,
        schema: apply.schema.clone(),
    })
}

/// `LeftOuterApply(outer, Agg[no group-by](inner))` becomes
/// `Agg[group by outer key](LeftOuterApply(outer, inner))`.
fn scalar_agg_to_join(apply: &Apply, agg: &Aggregation) -> Option<Arc<LogicalPlan>> {
    if apply.join_type != JoinType::LeftOuter
        || !agg.group_by.is_empty()
        || !apply.conditions.is_empty()
        || agg.aggs.is_empty()
        || !agg.aggs.iter().all(|a| a.func.null_on_empty())
    {
        return None;
    }
    let outer_schema = apply.outer.schema();
    let key = outer_schema.keys.iter().find(|k| !k.is_empty())?.clone();

    let lowered = apply.rebuild(apply.outer.clone(), agg.input.clone());
    let lowered = rewrite_apply(lowered.clone()).unwrap_or_else(|| Arc::new(LogicalPlan::Apply(lowered)));

    let group_by: Vec<Expr> = key
        .iter()
        .filter_map(|id| outer_schema.field_by_id(*id))
        .map(|f| Expr::Column(f.column_ref()))
        .collect();
    let mut aggs: Vec<AggCall> = outer_schema
        .fields
        .iter()
        .map(|f| AggCall::first_row(f.column_ref()))
        .collect();
    aggs.extend(agg.aggs.iter().cloned());
    let mut schema = Schema::merge(outer_schema, &agg.schema.clone().into_nullable());
    schema.keys = vec![key];
    debug!("scalar aggregate apply pulled above a left outer apply");
    Some(Arc::new(LogicalPlan::Aggregation(Aggregation {
        input: lowered,
        group_by,
        aggs,
        schema,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::expr::{BinOp, ColumnRef};

    fn correlated_eq(inner: ColumnRef, outer: ColumnRef) -> Expr {
        Expr::binary(BinOp::Eq, Expr::Column(inner), Expr::Correlated(outer))
    }

    #[test]
    fn uncorrelated_apply_becomes_join() {
        let outer = scan("t1", &["a", "b"], 1);
        let inner = scan("t2", &["a", "b"], 3);
        let apply = Arc::new(LogicalPlan::Apply(Apply::new(outer, inner, JoinType::Semi)));
        let out = Decorrelator.optimize(apply).unwrap();
        assert!(matches!(out.as_ref(), LogicalPlan::Join(j) if j.join_type == JoinType::Semi));
    }

    #[test]
    fn correlated_selection_becomes_equal_condition() {
        let outer = scan("t1", &["a", "b"], 1);
        let inner = scan("t2", &["a", "b"], 3);
        let (oa, ia) = (col(&outer, "a"), col(&inner, "a"));
        let sel = Arc::new(LogicalPlan::Selection {
            input: inner,
            conditions: vec![correlated_eq(ia.clone(), oa.clone())],
        });
        let apply = Arc::new(LogicalPlan::Apply(Apply::new(outer, sel, JoinType::Semi)));
        let out = Decorrelator.optimize(apply).unwrap();
        let LogicalPlan::Join(join) = out.as_ref() else {
            panic!("expected join, got {}", out.explain());
        };
        assert_eq!(join.equal_conditions.len(), 1);
        assert_eq!(join.equal_conditions[0].0.id, oa.id);
        assert_eq!(join.equal_conditions[0].1.id, ia.id);
    }

    fn renamed(input: &Arc<LogicalPlan>, name: &str, id: u64) -> Arc<LogicalPlan> {
        let src = col(input, name);
        let field = input
            .schema()
            .field_by_id(src.id)
            .cloned()
            .map(|f| sqlopt_core::schema::Field::new(ColumnId::new(id), "x", f.data_type, f.nullable))
            .unwrap();
        Arc::new(LogicalPlan::Projection {
            input: input.clone(),
            exprs: vec![Expr::Column(src)],
            schema: Schema::new(vec![field]),
        })
    }

    #[test]
    fn renaming_projection_keeps_condition_columns_available() {
        let outer = scan("t1", &["a", "b"], 1);
        let inner = scan("t2", &["a", "b"], 3);
        let (oa, ob, ia) = (col(&outer, "a"), col(&outer, "b"), col(&inner, "a"));
        let sel = Arc::new(LogicalPlan::Selection {
            input: inner.clone(),
            conditions: vec![correlated_eq(ia.clone(), oa)],
        });
        let proj = renamed(&sel, "b", 9);
        let mut apply = Apply::new(outer, proj.clone(), JoinType::Semi);
        apply.conditions = vec![Expr::binary(BinOp::Eq, Expr::Column(ob), Expr::Column(col(&proj, "x")))];
        let out = Decorrelator.optimize(Arc::new(LogicalPlan::Apply(apply))).unwrap();

        let LogicalPlan::Join(join) = out.as_ref() else {
            panic!("expected join, got {}", out.explain());
        };
        let mut available = join.left.schema().id_set();
        available.extend(join.right.schema().ids());
        for cond in join.all_conditions() {
            assert!(cond.column_ids().is_subset(&available), "{}", out.explain());
        }
        assert!(!out.explain().contains("#9"), "{}", out.explain());
    }

    #[test]
    fn renaming_projection_under_inner_apply_is_lifted() {
        let outer = scan("t1", &["a", "b"], 1);
        let inner = scan("t2", &["a", "b"], 3);
        let (oa, ia) = (col(&outer, "a"), col(&inner, "a"));
        let sel = Arc::new(LogicalPlan::Selection {
            input: inner,
            conditions: vec![correlated_eq(ia, oa)],
        });
        let apply = Apply::new(outer, renamed(&sel, "b", 9), JoinType::Inner);
        let out_ids = apply.schema.ids();
        let out = Decorrelator.optimize(Arc::new(LogicalPlan::Apply(apply))).unwrap();

        let LogicalPlan::Projection { input, .. } = out.as_ref() else {
            panic!("expected projection, got {}", out.explain());
        };
        assert!(matches!(input.as_ref(), LogicalPlan::Join(_)), "{}", out.explain());
        assert_eq!(out.schema().ids(), out_ids);
    }
}
