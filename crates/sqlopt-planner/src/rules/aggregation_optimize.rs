//! Aggregation rewrites.
//!
//! - An aggregation grouped by a unique key of its input sees one row per
//!   group and becomes a projection.
//! - Otherwise an aggregation over an inner equi-join whose arguments all
//!   come from one side is split: a Partial aggregation below the join on
//!   that side, a Final one above it.

use std::collections::HashSet;
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::{AggCall, AggFunc, AggMode, Expr};
use sqlopt_core::id::{ColumnId, ColumnIdGen};
use sqlopt_core::logical::{Aggregation, Join, JoinType, LogicalPlan};
use sqlopt_core::schema::{Field, Schema};
use sqlopt_core::types::Scalar;
use tracing::debug;

use super::{replace_children, LogicalRule};

pub struct AggregationOptimizer;

impl LogicalRule for AggregationOptimizer {
    fn name(&self) -> &'static str {
        "aggregation_optimize"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        let mut ids = ColumnIdGen::after(plan.max_column_id());
        Ok(optimize(&plan, &mut ids))
    }
}

fn optimize(plan: &Arc<LogicalPlan>, ids: &mut ColumnIdGen) -> Arc<LogicalPlan> {
    let children: Vec<Arc<LogicalPlan>> = plan
        .children()
        .into_iter()
        .map(|c| optimize(c, ids))
        .collect();
    let plan = replace_children(plan, children);
    let rewritten = match plan.as_ref() {
        LogicalPlan::Aggregation(agg) if agg.aggs.iter().all(|a| a.mode == AggMode::Complete) => {
            eliminate(agg).or_else(|| push_below_join(agg, ids))
        }
        _ => None,
    };
    rewritten.unwrap_or(plan)
}

fn group_columns(agg: &Aggregation) -> Option<HashSet<ColumnId>> {
    agg.group_by
        .iter()
        .map(|g| g.as_column().map(|c| c.id))
        .collect()
}

fn eliminate(agg: &Aggregation) -> Option<Arc<LogicalPlan>> {
    if agg.group_by.is_empty() {
        return None;
    }
    let group = group_columns(agg)?;
    let input_schema = agg.input.schema();
    if !input_schema.has_key_within(&group) {
        return None;
    }
    let mut exprs = Vec::with_capacity(agg.aggs.len());
    for call in &agg.aggs {
        let expr = match call.func {
            AggFunc::Count => match call.args.as_slice() {
                [] => Expr::Literal(Scalar::I64(1)),
                [arg] => {
                    let col = arg.as_column()?;
                    match input_schema.field_by_id(col.id) {
                        Some(f) if !f.nullable => Expr::Literal(Scalar::I64(1)),
                        _ => return None,
                    }
                }
                _ => return None,
            },
            // AVG yields a float even over integer input.
            AggFunc::Avg => return None,
            AggFunc::FirstRow | AggFunc::Max | AggFunc::Min | AggFunc::Sum => {
                match call.args.as_slice() {
                    [arg] => arg.clone(),
                    _ => return None,
                }
            }
        };
        exprs.push(expr);
    }
    debug!("aggregation grouped by a unique key eliminated");
    Some(Arc::new(LogicalPlan::Projection {
        input: agg.input.clone(),
        exprs,
        schema: agg.schema.clone(),
    }))
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Left,
    Right,
}

fn push_below_join(agg: &Aggregation, ids: &mut ColumnIdGen) -> Option<Arc<LogicalPlan>> {
    let LogicalPlan::Join(join) = agg.input.as_ref() else {
        return None;
    };
    if join.join_type != JoinType::Inner || join.equal_conditions.is_empty() {
        return None;
    }
    let group = group_columns(agg)?;
    if agg.aggs.iter().any(|a| !a.is_decomposable()) {
        return None;
    }
    // A final sum over no rows is NULL where COUNT must be 0.
    if agg.group_by.is_empty() && agg.aggs.iter().any(|a| a.func == AggFunc::Count) {
        return None;
    }
    // Nothing to gain when every call just carries a group column.
    let passthrough = |a: &AggCall| {
        a.func == AggFunc::FirstRow
            && a.args.first().and_then(Expr::as_column).map(|c| group.contains(&c.id)) == Some(true)
    };
    if agg.aggs.iter().all(|a| passthrough(a)) {
        return None;
    }

    let left_ids = join.left.schema().id_set();
    let right_ids = join.right.schema().id_set();
    let mut arg_cols = HashSet::new();
    for call in agg.aggs.iter().filter(|a| !passthrough(a)) {
        arg_cols.extend(call.column_ids());
    }
    let side = if arg_cols.is_subset(&left_ids) {
        Side::Left
    } else if arg_cols.is_subset(&right_ids) {
        Side::Right
    } else {
        return None;
    };
    let (side_plan, side_ids) = match side {
        Side::Left => (&join.left, &left_ids),
        Side::Right => (&join.right, &right_ids),
    };

    // Columns of the pushed side still needed above the partial aggregate.
    let mut needed: HashSet<ColumnId> = group.intersection(side_ids).copied().collect();
    for (l, r) in &join.equal_conditions {
        needed.insert(if side == Side::Left { l.id } else { r.id });
    }
    for c in join.all_conditions() {
        needed.extend(c.column_ids().intersection(side_ids).copied());
    }
    let group_fields: Vec<Field> = side_plan
        .schema()
        .fields
        .iter()
        .filter(|f| needed.contains(&f.id))
        .cloned()
        .collect();

    let mut partial_aggs: Vec<AggCall> = group_fields
        .iter()
        .map(|f| AggCall::first_row(f.column_ref()))
        .collect();
    let mut partial_fields = group_fields.clone();
    let mut final_aggs = Vec::with_capacity(agg.aggs.len());
    for (call, field) in agg.aggs.iter().zip(agg.schema.fields.iter()) {
        if passthrough(call) {
            final_aggs.push(call.clone());
            continue;
        }
        let out = Field::new(
            ids.next_id(),
            format!("partial_{}", field.name),
            field.data_type,
            true,
        );
        let mut partial = call.clone();
        partial.mode = AggMode::Partial;
        partial_aggs.push(partial);
        final_aggs.push(AggCall {
            func: call.func.final_func()?,
            args: vec![Expr::Column(out.column_ref())],
            distinct: false,
            mode: AggMode::Final,
        });
        partial_fields.push(out);
    }

    let partial = Arc::new(LogicalPlan::Aggregation(Aggregation {
        input: side_plan.clone(),
        group_by: group_fields.iter().map(|f| Expr::Column(f.column_ref())).collect(),
        aggs: partial_aggs,
        schema: Schema::new(partial_fields),
    }));
    let new_join: Join = match side {
        Side::Left => join.rebuild(partial, join.right.clone(), join.join_type),
        Side::Right => join.rebuild(join.left.clone(), partial, join.join_type),
    };
    debug!(side = if side == Side::Left { "left" } else { "right" }, "partial aggregation pushed below join");
    Some(Arc::new(LogicalPlan::Aggregation(Aggregation {
        input: Arc::new(LogicalPlan::Join(new_join)),
        group_by: agg.group_by.clone(),
        aggs: final_aggs,
        schema: agg.schema.clone(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use crate::rules::KeyInfoBuilder;
    use sqlopt_core::schema::DataType;

    #[test]
    fn group_by_primary_key_becomes_projection() {
        let s = KeyInfoBuilder
            .optimize(scan("t", &["a", "b"], 1))
            .unwrap();
        let (a, b) = (col(&s, "a"), col(&s, "b"));
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: s.clone(),
            group_by: vec![Expr::Column(a.clone())],
            aggs: vec![
                AggCall::first_row(a.clone()),
                AggCall::new(AggFunc::Sum, vec![Expr::Column(b.clone())]),
            ],
            schema: Schema::new(vec![
                s.schema().fields[0].clone(),
                Field::new(ColumnId::new(10), "s", DataType::Int64, true),
            ]),
        }));
        let out = AggregationOptimizer.optimize(agg).unwrap();
        let LogicalPlan::Projection { exprs, .. } = out.as_ref() else {
            panic!("expected projection, got {}", out.explain());
        };
        assert_eq!(exprs, &vec![Expr::Column(a), Expr::Column(b)]);
    }

    #[test]
    fn aggregation_splits_over_inner_join() {
        let (l, r) = (scan("t1", &["a", "b"], 1), scan("t2", &["a", "b"], 3));
        let (la, ra, rb) = (col(&l, "a"), col(&r, "a"), col(&r, "b"));
        let join = Arc::new(LogicalPlan::Join(
            Join::new(l.clone(), r.clone(), JoinType::Inner).with_equal(la.clone(), ra),
        ));
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: join,
            group_by: vec![Expr::Column(la.clone())],
            aggs: vec![
                AggCall::first_row(la.clone()),
                AggCall::new(AggFunc::Count, vec![Expr::Column(rb)]),
            ],
            schema: Schema::new(vec![
                l.schema().fields[0].clone(),
                Field::new(ColumnId::new(10), "cnt", DataType::Int64, false),
            ]),
        }));
        let out = AggregationOptimizer.optimize(agg).unwrap();
        let LogicalPlan::Aggregation(top) = out.as_ref() else {
            panic!("expected aggregation, got {}", out.explain());
        };
        assert_eq!(top.aggs[1].mode, AggMode::Final);
        assert_eq!(top.aggs[1].func, AggFunc::Sum);
        let LogicalPlan::Join(j) = top.input.as_ref() else {
            panic!("expected join");
        };
        let LogicalPlan::Aggregation(partial) = j.right.as_ref() else {
            panic!("expected partial aggregation on the right");
        };
        assert!(partial.aggs.iter().any(|a| a.mode == AggMode::Partial));

        // Already split: a second pass leaves it alone.
        let again = AggregationOptimizer.optimize(out.clone()).unwrap();
        assert!(Arc::ptr_eq(&out, &again));
    }

    #[test]
    fn scalar_count_over_join_is_not_split() {
        let (l, r) = (scan("t1", &["a", "b"], 1), scan("t2", &["a", "b"], 3));
        let (la, ra) = (col(&l, "a"), col(&r, "a"));
        let join = Arc::new(LogicalPlan::Join(
            Join::new(l, r, JoinType::Inner).with_equal(la, ra),
        ));
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: join,
            group_by: vec![],
            aggs: vec![AggCall::new(AggFunc::Count, vec![])],
            schema: Schema::new(vec![Field::new(ColumnId::new(10), "n", DataType::Int64, false)]),
        }));
        let out = AggregationOptimizer.optimize(agg.clone()).unwrap();
        assert!(Arc::ptr_eq(&out, &agg), "{}", out.explain());
    }

    #[test]
    fn avg_keeps_aggregation_over_unique_key() {
        let s = KeyInfoBuilder.optimize(scan("t", &["a", "b"], 1)).unwrap();
        let (a, b) = (col(&s, "a"), col(&s, "b"));
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: s.clone(),
            group_by: vec![Expr::Column(a.clone())],
            aggs: vec![
                AggCall::first_row(a),
                AggCall::new(AggFunc::Avg, vec![Expr::Column(b)]),
            ],
            schema: Schema::new(vec![
                s.schema().fields[0].clone(),
                Field::new(ColumnId::new(10), "avg_b", DataType::Float64, true),
            ]),
        }));
        let out = AggregationOptimizer.optimize(agg).unwrap();
        assert!(matches!(out.as_ref(), LogicalPlan::Aggregation(_)), "{}", out.explain());
    }
}
