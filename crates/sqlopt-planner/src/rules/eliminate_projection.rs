//! Logical projection elimination.
//!
//! Removes projections that hand their child's columns through unchanged and
//! merges a projection directly over another projection.

use std::collections::HashMap;
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::Expr;
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::LogicalPlan;
use sqlopt_core::schema::Schema;

use super::{replace_children, LogicalRule};

pub struct ProjectionEliminator;

impl LogicalRule for ProjectionEliminator {
    fn name(&self) -> &'static str {
        "eliminate_projection"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(eliminate(&plan))
    }
}

fn eliminate(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let children: Vec<Arc<LogicalPlan>> = plan.children().into_iter().map(eliminate).collect();
    let plan = replace_children(plan, children);

    let LogicalPlan::Projection {
        input,
        exprs,
        schema,
    } = plan.as_ref()
    else {
        return plan;
    };

    // Projection over projection: substitute the inner expressions.
    if let LogicalPlan::Projection {
        input: grand,
        exprs: inner_exprs,
        schema: inner_schema,
    } = input.as_ref()
    {
        let map: HashMap<ColumnId, Expr> = inner_schema
            .fields
            .iter()
            .zip(inner_exprs.iter())
            .map(|(f, e)| (f.id, e.clone()))
            .collect();
        let merged: Vec<Expr> = exprs.iter().map(|e| e.substitute(&map)).collect();
        if is_identity(&merged, schema, grand.schema()) {
            return grand.clone();
        }
        return Arc::new(LogicalPlan::Projection {
            input: grand.clone(),
            exprs: merged,
            schema: schema.clone(),
        });
    }

    if is_identity(exprs, schema, input.schema()) {
        return input.clone();
    }
    plan
}

/// Same column ids, same names, same order as the child.
pub(crate) fn is_identity(exprs: &[Expr], schema: &Schema, child: &Schema) -> bool {
    exprs.len() == child.len()
        && schema.len() == child.len()
        && exprs
            .iter()
            .zip(schema.fields.iter())
            .zip(child.fields.iter())
            .all(|((e, out), inp)| match e.as_column() {
                Some(c) => c.id == inp.id && out.id == inp.id && out.name == inp.name,
                None => false,
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::expr::BinOp;
    use sqlopt_core::schema::{DataType, Field};
    use sqlopt_core::types::Scalar;

    #[test]
    fn identity_projection_is_removed() {
        let s = scan("t", &["a", "b"], 1);
        let proj = Arc::new(LogicalPlan::Projection {
            input: s.clone(),
            exprs: s.schema().fields.iter().map(|f| Expr::Column(f.column_ref())).collect(),
            schema: s.schema().clone(),
        });
        let out = ProjectionEliminator.optimize(proj).unwrap();
        assert!(Arc::ptr_eq(&out, &s));
    }

    #[test]
    fn reordering_projection_is_kept() {
        let s = scan("t", &["a", "b"], 1);
        let fields: Vec<Field> = s.schema().fields.iter().rev().cloned().collect();
        let proj = Arc::new(LogicalPlan::Projection {
            input: s.clone(),
            exprs: fields.iter().map(|f| Expr::Column(f.column_ref())).collect(),
            schema: Schema::new(fields),
        });
        let out = ProjectionEliminator.optimize(proj.clone()).unwrap();
        assert!(Arc::ptr_eq(&out, &proj));
    }

    #[test]
    fn stacked_projections_merge() {
        let s = scan("t", &["a", "b"], 1);
        let a = col(&s, "a");
        let plus = Expr::binary(BinOp::Add, Expr::Column(a.clone()), Expr::Literal(Scalar::I64(1)));
        let c = Field::new(ColumnId::new(10), "c", DataType::Int64, true);
        let inner = Arc::new(LogicalPlan::Projection {
            input: s.clone(),
            exprs: vec![plus.clone()],
            schema: Schema::new(vec![c.clone()]),
        });
        let outer = Arc::new(LogicalPlan::Projection {
            input: inner,
            exprs: vec![Expr::Column(c.column_ref())],
            schema: Schema::new(vec![c.clone()]),
        });
        let out = ProjectionEliminator.optimize(outer).unwrap();
        let LogicalPlan::Projection { input, exprs, .. } = out.as_ref() else {
            panic!("expected projection");
        };
        assert!(Arc::ptr_eq(input, &s));
        assert_eq!(exprs, &vec![plus]);
    }
}
