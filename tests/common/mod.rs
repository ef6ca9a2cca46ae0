//! Shared fixtures: a two-table catalog and helpers that run the optimizer
//! over YAML query documents.
#![allow(dead_code)]

use sqlopt_core::prelude::{Expr, LogicalPlan, OptimizerConfig, PhysicalPlan, Plan, Result};
use sqlopt_planner::dsl::{parse_query, QueryDoc, YamlPlanBuilder};
use sqlopt_planner::Optimizer;
use std::collections::HashSet;
use std::sync::Arc;

/// `t(a pk, b idx_b, c)` with statistics, `s(d pk, e idx_e, f)` without.
pub const CATALOG: &str = r#"
db: test
catalog:
  tables:
    - name: t
      primary_key: a
      columns:
        - { name: a, type: int64, nullable: false }
        - { name: b, type: int64 }
        - { name: c, type: utf8 }
      indexes:
        - { name: idx_b, columns: [b] }
      stats:
        row_count: 10000
        columns:
          a: { min: 1, max: 10000, distinct_count: 10000 }
          b: { min: 0, max: 1000, distinct_count: 1000 }
    - name: s
      primary_key: d
      columns:
        - { name: d, type: int64, nullable: false }
        - { name: e, type: int64 }
        - { name: f, type: utf8 }
      indexes:
        - { name: idx_e, columns: [e] }
"#;

/// The shared catalog followed by `rest` (a `statement:` block and
/// optionally `prepared:` / `privileges:`).
pub fn doc(rest: &str) -> QueryDoc {
    parse_query(&format!("{}{}", CATALOG, rest)).expect("test document parses")
}

pub fn optimize(doc: &QueryDoc, config: OptimizerConfig) -> Result<Plan> {
    let catalog = doc.catalog().expect("catalog builds");
    let ctx = doc.session(&catalog);
    Optimizer::new(YamlPlanBuilder, config).optimize(&ctx, &doc.statement, &catalog)
}

pub fn optimize_default(doc: &QueryDoc) -> Result<Plan> {
    optimize(doc, OptimizerConfig::default())
}

pub fn physical(plan: &Plan) -> &PhysicalPlan {
    plan.as_physical().expect("physical plan")
}

pub fn logical(doc: &QueryDoc) -> Arc<LogicalPlan> {
    let catalog = doc.catalog().expect("catalog builds");
    let ctx = doc.session(&catalog);
    let plan = Optimizer::new(YamlPlanBuilder, OptimizerConfig::default())
        .build_logical_plan(&ctx, &doc.statement, &catalog)
        .expect("statement builds");
    plan.as_logical().expect("logical plan").clone()
}

/// Every column an operator reads is produced by one of its inputs (or,
/// for a scan, by the scan itself).
pub fn assert_columns_available(plan: &LogicalPlan) {
    plan.visit(&mut |node| {
        let available: HashSet<_> = match node {
            LogicalPlan::Scan(scan) => scan.schema.id_set(),
            other => other.children().iter().flat_map(|c| c.schema().ids()).collect(),
        };
        for e in node.expressions() {
            let missing: Vec<_> = e.column_ids().difference(&available).copied().collect();
            assert!(missing.is_empty(), "{} reads unavailable columns {:?}", node.name(), missing);
        }
    });
}

/// Every resolved position in the physical tree lies within its input.
pub fn assert_indices_in_bounds(plan: &PhysicalPlan) {
    plan.visit(&mut |node| {
        let arity: usize = if node.children.is_empty() {
            node.schema.len()
        } else {
            node.children.iter().map(|c| c.schema.len()).sum()
        };
        for e in physical_exprs(node) {
            check_index(e, arity);
        }
    });
}

fn physical_exprs(node: &PhysicalPlan) -> Vec<&Expr> {
    use sqlopt_core::physical::PhysicalOp::*;
    match &node.op {
        TableScan { access_conditions, .. } | IndexScan { access_conditions, .. } => {
            access_conditions.iter().collect()
        }
        Selection { conditions } => conditions.iter().collect(),
        Projection { exprs } => exprs.iter().collect(),
        HashAgg { group_by, aggs } | StreamAgg { group_by, aggs } => group_by
            .iter()
            .chain(aggs.iter().flat_map(|a| a.args.iter()))
            .collect(),
        Sort { by } | TopN { by, .. } => by.iter().map(|s| &s.expr).collect(),
        _ => Vec::new(),
    }
}

fn check_index(e: &Expr, arity: usize) {
    match e {
        Expr::Column(c) => {
            let idx = c.index.expect("column position resolved");
            assert!(idx < arity, "column {} at {} outside input of {}", c.name, idx, arity);
        }
        Expr::BinaryOp { left, right, .. } => {
            check_index(left, arity);
            check_index(right, arity);
        }
        Expr::UnaryOp { arg, .. } => check_index(arg, arity),
        Expr::Correlated(_) | Expr::Literal(_) => {}
    }
}
