//! `MIN`/`MAX` over an indexed column becomes a one-row ordered read.
//!
//! `Agg[max(c)](X)` turns into `Agg[max(c)](Limit 1(Sort c desc(Sel c IS NOT NULL(X))))`
//! when `c` leads an index or is the integer primary key of the scan below.

use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::{AggFunc, ColumnRef, Expr, SortItem, UnaryOp};
use sqlopt_core::logical::{Aggregation, LogicalPlan};
use tracing::debug;

use super::{replace_children, LogicalRule};

pub struct MaxMinEliminator;

impl LogicalRule for MaxMinEliminator {
    fn name(&self) -> &'static str {
        "max_min_eliminate"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(eliminate(&plan))
    }
}

fn eliminate(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let children: Vec<Arc<LogicalPlan>> = plan.children().into_iter().map(eliminate).collect();
    let plan = replace_children(plan, children);
    let rewritten = match plan.as_ref() {
        LogicalPlan::Aggregation(agg) => rewrite(agg),
        _ => None,
    };
    rewritten.unwrap_or(plan)
}

fn rewrite(agg: &Aggregation) -> Option<Arc<LogicalPlan>> {
    if !agg.group_by.is_empty() || agg.aggs.len() != 1 {
        return None;
    }
    let call = &agg.aggs[0];
    let desc = match call.func {
        AggFunc::Max => true,
        AggFunc::Min => false,
        _ => return None,
    };
    if call.args.len() != 1 || already_rewritten(&agg.input) {
        return None;
    }
    let col = call.args[0].as_column()?;
    if !leads_access_path(&agg.input, col) {
        return None;
    }

    debug!(column = %col, "rewriting {} into an ordered limit", call.func.name());
    let not_null = Arc::new(LogicalPlan::Selection {
        input: agg.input.clone(),
        conditions: vec![Expr::unary(UnaryOp::IsNotNull, Expr::Column(col.clone()))],
    });
    let sort = Arc::new(LogicalPlan::Sort {
        input: not_null,
        by: vec![SortItem::new(Expr::Column(col.clone()), desc)],
    });
    let limit = Arc::new(LogicalPlan::Limit {
        input: sort,
        offset: 0,
        count: 1,
    });
    Some(Arc::new(LogicalPlan::Aggregation(Aggregation {
        input: limit,
        group_by: vec![],
        aggs: agg.aggs.clone(),
        schema: agg.schema.clone(),
    })))
}

fn already_rewritten(input: &LogicalPlan) -> bool {
    match input {
        LogicalPlan::Limit { input, count: 1, .. } => {
            matches!(input.as_ref(), LogicalPlan::Sort { .. })
        }
        LogicalPlan::TopN { count: 1, .. } => true,
        _ => false,
    }
}

/// Follow row-preserving nodes down to the scan that produces `col` and
/// check that some access path of that scan is ordered by it.
fn leads_access_path(plan: &LogicalPlan, col: &ColumnRef) -> bool {
    match plan {
        LogicalPlan::Scan(scan) => {
            let Some(name) = scan.column_name(col.id) else {
                return false;
            };
            scan.table.pk_is_handle.as_deref() == Some(name)
                || scan
                    .table
                    .indexes
                    .iter()
                    .any(|i| i.leading_column() == Some(name))
        }
        LogicalPlan::Selection { input, .. } => leads_access_path(input, col),
        LogicalPlan::Projection { input, exprs, schema } => {
            let Some(pos) = schema.index_of(col.id) else {
                return false;
            };
            match exprs[pos].as_column() {
                Some(inner) => leads_access_path(input, inner),
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::expr::AggCall;
    use sqlopt_core::id::ColumnId;
    use sqlopt_core::schema::{DataType, Field, Schema};

    fn max_of(input: Arc<LogicalPlan>, c: ColumnRef) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Aggregation(Aggregation {
            input,
            group_by: vec![],
            aggs: vec![AggCall::new(AggFunc::Max, vec![Expr::Column(c)])],
            schema: Schema::new(vec![Field::new(ColumnId::new(50), "m", DataType::Int64, true)]),
        }))
    }

    #[test]
    fn indexed_max_gets_limit() {
        let s = scan("t", &["a", "b", "c"], 1);
        let out = MaxMinEliminator.optimize(max_of(s.clone(), col(&s, "b"))).unwrap();
        let names: Vec<&str> = {
            let mut v = Vec::new();
            out.visit(&mut |n| v.push(n.name()));
            v
        };
        assert_eq!(names, vec!["Aggregation", "Limit", "Sort", "Selection", "Scan"]);

        let again = MaxMinEliminator.optimize(out.clone()).unwrap();
        assert!(Arc::ptr_eq(&out, &again));
    }

    #[test]
    fn unindexed_column_is_left_alone() {
        let s = scan("t", &["a", "b", "c"], 1);
        let agg = max_of(s.clone(), col(&s, "c"));
        let out = MaxMinEliminator.optimize(agg.clone()).unwrap();
        assert!(Arc::ptr_eq(&out, &agg));
    }
}
