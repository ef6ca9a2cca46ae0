//! Optimizer driver.
//!
//! build → privilege check → logical rules → cartesian guard → cost search
//! → physical projection elimination. Non-query plans are returned as the
//! builder produced them; `Execute` optimizes the named prepared statement
//! and attaches the result.

use std::sync::Arc;
use std::time::Instant;

use sqlopt_core::catalog::Catalog;
use sqlopt_core::config::{OptimizerConfig, RuleFlags};
use sqlopt_core::error::{Error, Result};
use sqlopt_core::logical::LogicalPlan;
use sqlopt_core::physical::PhysicalPlan;
use sqlopt_core::plan::{Execute, Plan};
use sqlopt_core::privilege::{PrivilegeManager, VisitInfo};
use tracing::{debug, info};

use crate::builder::{BuildOutput, PlanBuilder};
use crate::cartesian::exists_cartesian_product;
use crate::context::SessionContext;
use crate::cost::CostFactors;
use crate::projection::eliminate_physical_projection;
use crate::rules::logical_optimize;
use crate::search::physical_optimize;

/// Owns the read-only configuration and the plan builder. One optimizer
/// may serve concurrent calls; all per-call state lives on the stack.
pub struct Optimizer<B> {
    config: OptimizerConfig,
    builder: B,
    cost: CostFactors,
}

impl<B: PlanBuilder> Optimizer<B> {
    pub fn new(builder: B, config: OptimizerConfig) -> Self {
        Self {
            config,
            builder,
            cost: CostFactors::default(),
        }
    }

    pub fn with_cost_factors(mut self, cost: CostFactors) -> Self {
        self.cost = cost;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Build and optimize `node`.
    pub fn optimize(
        &self,
        ctx: &SessionContext<B::Node>,
        node: &B::Node,
        catalog: &dyn Catalog,
    ) -> Result<Plan> {
        let built = self.build(ctx, node, catalog)?;
        self.optimize_built(ctx, built, catalog)
    }

    /// Build `node` without optimizing it.
    pub fn build_logical_plan(
        &self,
        ctx: &SessionContext<B::Node>,
        node: &B::Node,
        catalog: &dyn Catalog,
    ) -> Result<Plan> {
        Ok(self.build(ctx, node, catalog)?.plan)
    }

    fn build(
        &self,
        ctx: &SessionContext<B::Node>,
        node: &B::Node,
        catalog: &dyn Catalog,
    ) -> Result<BuildOutput> {
        self.builder
            .build(ctx, node, catalog)
            .map_err(|e| if e.is_user_error() { e } else { e.with_context("plan build") })
    }

    fn optimize_built(
        &self,
        ctx: &SessionContext<B::Node>,
        built: BuildOutput,
        catalog: &dyn Catalog,
    ) -> Result<Plan> {
        check_privilege(ctx.privilege_manager(), &built.visit_info)?;
        match built.plan {
            Plan::Logical(logic) => {
                let flags = self.config.rule_flags.unwrap_or(built.flags);
                Ok(Plan::Physical(self.do_optimize(ctx, flags, logic)?))
            }
            Plan::Execute(exec) => Ok(Plan::Execute(self.execute(ctx, exec, catalog)?)),
            other => {
                debug!(kind = other.kind(), "plan passes through unoptimized");
                Ok(other)
            }
        }
    }

    fn execute(
        &self,
        ctx: &SessionContext<B::Node>,
        mut exec: Execute,
        catalog: &dyn Catalog,
    ) -> Result<Execute> {
        let node = ctx
            .prepared(&exec.name)
            .ok_or_else(|| Error::Plan(format!("prepared statement '{}' not found", exec.name)))?;
        let built = self.build(ctx, node, catalog)?;
        if let Plan::Execute(nested) = &built.plan {
            return Err(Error::Plan(format!(
                "prepared statement '{}' cannot execute another prepared statement ('{}')",
                exec.name, nested.name
            )));
        }
        debug!(name = %exec.name, kind = built.plan.kind(), "optimizing prepared statement");
        exec.plan = Some(Box::new(self.optimize_built(ctx, built, catalog)?));
        Ok(exec)
    }

    fn do_optimize(
        &self,
        ctx: &SessionContext<B::Node>,
        flags: RuleFlags,
        logic: Arc<LogicalPlan>,
    ) -> Result<PhysicalPlan> {
        let start = Instant::now();
        let logic = logical_optimize(flags, logic)?;
        if !self.config.allow_cartesian_product && exists_cartesian_product(&logic) {
            debug!("rejecting plan with a cartesian product");
            return Err(Error::CartesianProductUnsupported);
        }
        let physical = physical_optimize(&logic, ctx.stats_provider(), &self.cost)
            .map_err(|e| e.with_context("physical optimization"))?;
        let physical = eliminate_physical_projection(physical)
            .map_err(|e| e.with_context("physical projection elimination"))?;
        info!(
            flags = flags.bits(),
            operators = physical.op_names().len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "query optimized"
        );
        Ok(physical)
    }
}

/// Verify every visit record; the first one refused becomes the error.
/// Without a privilege manager nothing is checked.
pub fn check_privilege(pm: Option<&dyn PrivilegeManager>, visits: &[VisitInfo]) -> Result<()> {
    let Some(pm) = pm else {
        return Ok(());
    };
    let denied = visits
        .iter()
        .find(|v| !pm.request_verification(&v.db, &v.table, &v.column, v.privilege));
    match denied {
        Some(v) => {
            debug!(privilege = %v.privilege, db = %v.db, table = %v.table, "privilege denied");
            Err(Error::PrivilegeDenied {
                privilege: v.privilege,
                db: v.db.clone(),
                table: v.table.clone(),
                column: v.column.clone(),
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::catalog::MemoryCatalog;
    use sqlopt_core::logical::{Join, JoinType};
    use sqlopt_core::plan::Ddl;
    use sqlopt_core::privilege::{Privilege, StaticGrants};

    /// Hands back the node it is given.
    struct Echo;

    impl PlanBuilder for Echo {
        type Node = BuildOutput;

        fn build(&self, _: &SessionContext<BuildOutput>, node: &BuildOutput, _: &dyn Catalog) -> Result<BuildOutput> {
            Ok(node.clone())
        }
    }

    fn output(plan: Plan, visit_info: Vec<VisitInfo>) -> BuildOutput {
        BuildOutput {
            plan,
            visit_info,
            flags: RuleFlags::PRUNE_COLUMNS,
        }
    }

    fn cross_join() -> Plan {
        let l = scan("l", &["a", "b"], 1);
        let r = scan("r", &["c", "d"], 3);
        Plan::Logical(Arc::new(LogicalPlan::Join(Join::new(l, r, JoinType::Inner))))
    }

    fn equi_join() -> Plan {
        let l = scan("l", &["a", "b"], 1);
        let r = scan("r", &["c", "d"], 3);
        let (a, c) = (col(&l, "a"), col(&r, "c"));
        Plan::Logical(Arc::new(LogicalPlan::Join(Join::new(l, r, JoinType::Inner).with_equal(a, c))))
    }

    #[test]
    fn cartesian_product_rejected_when_disallowed() {
        let opt = Optimizer::new(Echo, OptimizerConfig::default().with_allow_cartesian_product(false));
        let ctx = SessionContext::new("test");
        let err = opt
            .optimize(&ctx, &output(cross_join(), vec![]), &MemoryCatalog::new())
            .unwrap_err();
        assert!(matches!(err, Error::CartesianProductUnsupported));

        let plan = opt
            .optimize(&ctx, &output(equi_join(), vec![]), &MemoryCatalog::new())
            .unwrap();
        assert!(plan.as_physical().is_some());
    }

    #[test]
    fn privilege_checked_before_rewriting() {
        let opt = Optimizer::new(Echo, OptimizerConfig::default().with_allow_cartesian_product(false));
        let grants = StaticGrants::new().grant(Privilege::Select, "test", "l");
        let ctx = SessionContext::new("test").with_privilege_manager(Arc::new(grants));
        let visits = vec![
            VisitInfo::new(Privilege::Select, "test", "l"),
            VisitInfo::new(Privilege::Select, "test", "r"),
        ];
        let err = opt
            .optimize(&ctx, &output(cross_join(), visits), &MemoryCatalog::new())
            .unwrap_err();
        match err {
            Error::PrivilegeDenied { table, .. } => assert_eq!(table, "r"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_query_plans_pass_through() {
        let opt = Optimizer::new(Echo, OptimizerConfig::default());
        let ddl = Plan::Ddl(Ddl {
            statement: "create table t (a int)".into(),
        });
        let out = opt
            .optimize(&SessionContext::new("test"), &output(ddl.clone(), vec![]), &MemoryCatalog::new())
            .unwrap();
        assert_eq!(out, ddl);
    }

    #[test]
    fn execute_attaches_prepared_plan() {
        let opt = Optimizer::new(Echo, OptimizerConfig::default());
        let mut ctx = SessionContext::new("test");
        ctx.prepare("q", output(equi_join(), vec![]));
        ctx.prepare("loop", output(Plan::Execute(Execute::new("q")), vec![]));
        let cat = MemoryCatalog::new();

        let out = opt
            .optimize(&ctx, &output(Plan::Execute(Execute::new("q")), vec![]), &cat)
            .unwrap();
        let Plan::Execute(exec) = out else {
            panic!("expected execute");
        };
        assert!(exec.plan.as_deref().and_then(Plan::as_physical).is_some());

        let missing = opt.optimize(&ctx, &output(Plan::Execute(Execute::new("nope")), vec![]), &cat);
        assert!(matches!(missing, Err(Error::Plan(_))));
        let nested = opt.optimize(&ctx, &output(Plan::Execute(Execute::new("loop")), vec![]), &cat);
        assert!(matches!(nested, Err(Error::Plan(_))));
    }
}
