//! Detection of unconstrained joins.

use sqlopt_core::logical::{JoinType, LogicalPlan};

/// True when some inner or outer join in the tree has no equality
/// condition. Semi and anti-semi joins never count, but the walk does not
/// stop at them: a product below a semi join is still reported.
pub fn exists_cartesian_product(plan: &LogicalPlan) -> bool {
    if let LogicalPlan::Join(join) = plan {
        let product_like = matches!(
            join.join_type,
            JoinType::Inner | JoinType::LeftOuter | JoinType::RightOuter
        );
        if product_like && join.equal_conditions.is_empty() {
            return true;
        }
    }
    plan.children()
        .into_iter()
        .any(|c| exists_cartesian_product(c))
}
