//! Cost search, plan finalization and physical projection elimination

mod common;

use common::{assert_indices_in_bounds, doc, optimize, optimize_default, physical};
use sqlopt_core::config::{OptimizerConfig, RuleFlags};
use sqlopt_core::error::Error;
use sqlopt_core::physical::{PhysicalOp, PhysicalPlan, TaskType};
use sqlopt_planner::resolve::validate;
use std::collections::HashSet;

fn select(query: &str) -> String {
    format!("statement:\n  kind: select\n  query:\n{}", indent(query, 4))
}

fn indent(s: &str, n: usize) -> String {
    s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| format!("{}{}\n", " ".repeat(n), l))
        .collect()
}

fn assert_ids_unique(plan: &PhysicalPlan) {
    let mut seen = HashSet::new();
    plan.visit(&mut |p| {
        assert!(p.id.get() > 0, "{} has no id", p.op.name());
        assert!(seen.insert(p.id.get()), "duplicate id {}", p.id.get());
    });
}

#[test]
fn test_single_scan_plan_is_valid() {
    for table in ["t", "s"] {
        let d = doc(&select(&format!("op: scan\ntable: {}", table)));
        let plan = optimize_default(&d).unwrap();
        let p = physical(&plan);
        assert_eq!(p.op_names(), vec!["Reader", "TableScan"]);
        assert_eq!(p.task, TaskType::Root);
        assert_eq!(p.children[0].task, TaskType::Cop);
        assert_eq!(p.schema.len(), 3);
        assert_ids_unique(p);
        assert_indices_in_bounds(p);
        validate(p).unwrap();
    }
}

#[test]
fn test_selective_filter_reads_index() {
    let d = doc(&select("op: filter\ncondition: \"b = 3\"\ninput: { op: scan, table: t }"));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    let mut index_read = false;
    p.visit(&mut |n| {
        if let PhysicalOp::IndexScan { index, access_conditions, .. } = &n.op {
            assert_eq!(index, "idx_b");
            assert_eq!(access_conditions.len(), 1);
            index_read = true;
        }
    });
    assert!(index_read, "expected an index read, got {:?}", p.op_names());
    assert_indices_in_bounds(p);
}

#[test]
fn test_primary_key_range_is_an_access_condition() {
    let d = doc(&select("op: filter\ncondition: \"a < 100\"\ninput: { op: scan, table: t }"));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    let mut ranged = false;
    p.visit(&mut |n| {
        if let PhysicalOp::TableScan { access_conditions, .. } = &n.op {
            ranged = access_conditions.len() == 1;
        }
    });
    assert!(ranged, "{}", p.explain());
    assert!(!p.contains_op("Selection"));
}

#[test]
fn test_order_by_primary_key_avoids_sort() {
    let d = doc(&select("op: sort\nby: [a]\ninput: { op: scan, table: t }"));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    assert!(!p.contains_op("Sort"), "{}", p.explain());
    let mut ordered_read = false;
    p.visit(&mut |n| {
        if let PhysicalOp::TableScan { keep_order, desc, .. } = &n.op {
            ordered_read = *keep_order && !*desc;
        }
    });
    assert!(ordered_read);
}

#[test]
fn test_order_by_unindexed_column_sorts() {
    let d = doc(&select("op: sort\nby: [c]\ninput: { op: scan, table: t }"));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    assert_eq!(p.op_names()[0], "Sort");
    validate(p).unwrap();
}

#[test]
fn test_limit_over_sort_pushes_top_n() {
    let d = doc(&select(
        "op: limit\ncount: 10\ninput:\n  op: sort\n  by: [c]\n  input: { op: scan, table: t }",
    ));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    assert!(p.contains_op("TopN"), "{}", p.explain());
    assert!(!p.contains_op("Sort"));
    assert!(p.est_rows <= 10.0);
}

#[test]
fn test_grouped_aggregate_is_planned() {
    let d = doc(&select(
        "op: aggregate\ngroup_by: [b]\naggs: [\"count(*) AS n\", \"sum(a) AS total\"]\ninput: { op: scan, table: t }",
    ));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    assert!(p.contains_op("HashAgg") || p.contains_op("StreamAgg"), "{}", p.explain());
    assert_eq!(p.schema.len(), 3);
    assert_indices_in_bounds(p);
    validate(p).unwrap();
}

#[test]
fn test_use_index_hint_restricts_paths() {
    let d = doc(&select("op: scan\ntable: t\nuse_index: [idx_b]"));
    let plan = optimize_default(&d).unwrap();
    let p = physical(&plan);
    assert!(p.contains_op("IndexLookUp"), "{}", p.explain());
}

#[test]
fn test_hint_excluding_every_path_has_no_plan() {
    let d = doc(&select("op: scan\ntable: t\nignore_index: [primary, idx_b]"));
    let err = optimize_default(&d).unwrap_err();
    assert!(matches!(err.root(), Error::NoPhysicalPlan(_)));
    assert_eq!(err.contexts(), vec!["physical optimization"]);
    assert!(!err.is_user_error());
}

#[test]
fn test_identity_projection_removed() {
    let d = doc(&select("op: project\ncolumns: [a, b, c]\ninput: { op: scan, table: t }"));
    let plan = optimize(&d, OptimizerConfig::default().with_rule_flags(RuleFlags::empty())).unwrap();
    let p = physical(&plan);
    assert!(!p.contains_op("Projection"), "{}", p.explain());
    validate(p).unwrap();
}

#[test]
fn test_reordering_projection_kept() {
    let d = doc(&select("op: project\ncolumns: [c, a]\ninput: { op: scan, table: t }"));
    let plan = optimize(&d, OptimizerConfig::default().with_rule_flags(RuleFlags::empty())).unwrap();
    let p = physical(&plan);
    assert_eq!(p.op_names()[0], "Projection");
    let PhysicalOp::Projection { exprs } = &p.op else {
        unreachable!()
    };
    let positions: Vec<_> = exprs.iter().map(|e| e.as_column().and_then(|c| c.index)).collect();
    assert_eq!(positions, vec![Some(2), Some(0)]);
}

#[test]
fn test_projection_removed_below_join_keeps_join_resolved() {
    let d = doc(&select(
        "op: join\non: \"t.a = s.d\"\nleft:\n  op: project\n  columns: [a, b, c]\n  input: { op: scan, table: t }\nright: { op: scan, table: s }",
    ));
    let plan = optimize(&d, OptimizerConfig::default().with_rule_flags(RuleFlags::empty())).unwrap();
    let p = physical(&plan);
    assert!(!p.contains_op("Projection"), "{}", p.explain());
    assert_ids_unique(p);
    validate(p).unwrap();
}

#[test]
fn test_correlated_subquery_plans_as_apply_without_rules() {
    let d = doc(&select(
        "op: apply\ntype: semi\nouter: { op: scan, table: t }\ninner:\n  op: filter\n  condition: \"d = a\"\n  input: { op: scan, table: s }",
    ));
    let plan = optimize(&d, OptimizerConfig::default().with_rule_flags(RuleFlags::empty())).unwrap();
    let p = physical(&plan);
    assert_eq!(p.op_names()[0], "NestedLoopApply");
    validate(p).unwrap();

    let plan = optimize_default(&d).unwrap();
    assert!(!physical(&plan).contains_op("NestedLoopApply"));
}
