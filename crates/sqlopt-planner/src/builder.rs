//! Boundary to the external plan builder.

use sqlopt_core::catalog::Catalog;
use sqlopt_core::config::RuleFlags;
use sqlopt_core::error::Result;
use sqlopt_core::plan::Plan;
use sqlopt_core::privilege::VisitInfo;

use crate::context::SessionContext;

/// What a builder hands back for one statement.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub plan: Plan,
    /// Objects touched by the statement, checked before optimization.
    pub visit_info: Vec<VisitInfo>,
    /// Logical rules this statement benefits from.
    pub flags: RuleFlags,
}

/// Turns a resolved query node into a plan. Name and type resolution live
/// here, not in the optimizer.
pub trait PlanBuilder {
    type Node;

    fn build(
        &self,
        ctx: &SessionContext<Self::Node>,
        node: &Self::Node,
        catalog: &dyn Catalog,
    ) -> Result<BuildOutput>;
}
