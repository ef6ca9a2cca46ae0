//! Physical identity-projection elimination.

use sqlopt_core::error::Result;
use sqlopt_core::physical::{PhysicalOp, PhysicalPlan};
use tracing::debug;

use crate::resolve::validate;

/// Splice out projections that only repeat their child's columns, then
/// re-check every resolved column position.
pub fn eliminate_physical_projection(plan: PhysicalPlan) -> Result<PhysicalPlan> {
    let mut removed = 0usize;
    let plan = eliminate(plan, &mut removed);
    validate(&plan)?;
    if removed > 0 {
        debug!(removed, "identity projections removed");
    }
    Ok(plan)
}

fn eliminate(mut plan: PhysicalPlan, removed: &mut usize) -> PhysicalPlan {
    plan.children = std::mem::take(&mut plan.children)
        .into_iter()
        .map(|c| eliminate(c, removed))
        .collect();
    if is_identity(&plan) {
        if let Some(child) = plan.children.pop() {
            *removed += 1;
            return child;
        }
    }
    plan
}

/// Expressions are exactly the child's columns, in order, by id and name.
fn is_identity(plan: &PhysicalPlan) -> bool {
    let PhysicalOp::Projection { exprs } = &plan.op else {
        return false;
    };
    let [child] = plan.children.as_slice() else {
        return false;
    };
    exprs.len() == child.schema.len()
        && plan.schema.ids() == child.schema.ids()
        && exprs.iter().zip(&child.schema.fields).all(|(e, f)| {
            e.as_column()
                .map(|c| c.id == f.id && c.name == f.name)
                .unwrap_or(false)
        })
}
