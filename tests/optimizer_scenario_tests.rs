//! End-to-end optimizer scenarios over YAML query documents

mod common;

use common::{doc, optimize, optimize_default, physical};
use sqlopt_core::config::{OptimizerConfig, RuleFlags};
use sqlopt_core::error::Error;
use sqlopt_core::physical::PhysicalOp;
use sqlopt_core::plan::Plan;
use sqlopt_core::privilege::Privilege;
use sqlopt_planner::resolve::validate;

const CROSS_JOIN: &str = r#"
statement:
  kind: select
  query:
    op: join
    left: { op: scan, table: t }
    right: { op: scan, table: s }
"#;

#[test]
fn test_cartesian_product_rejected_when_disallowed() {
    let d = doc(CROSS_JOIN);
    let err = optimize(&d, OptimizerConfig::default().with_allow_cartesian_product(false)).unwrap_err();
    assert!(matches!(err, Error::CartesianProductUnsupported));
    assert!(err.is_user_error());
    assert!(!err.suggestions().is_empty());
}

#[test]
fn test_cartesian_product_planned_when_allowed() {
    let plan = optimize_default(&doc(CROSS_JOIN)).unwrap();
    let p = physical(&plan);
    assert!(p.contains_op("HashJoin"));
    validate(p).unwrap();
}

#[test]
fn test_equi_join_is_planned() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: join
    on: "t.a = s.d"
    left: { op: scan, table: t }
    right: { op: scan, table: s }
"#);
    let plan = optimize(&d, OptimizerConfig::default().with_allow_cartesian_product(false)).unwrap();
    let p = physical(&plan);
    let join = match &p.op {
        PhysicalOp::HashJoin { equal_conditions, .. } | PhysicalOp::MergeJoin { equal_conditions, .. } => {
            equal_conditions
        }
        other => panic!("expected a join at the root, got {}", other.name()),
    };
    assert_eq!(join.len(), 1);
    assert_eq!(join[0].0.index, Some(0));
    assert_eq!(join[0].1.index, Some(0));
    validate(p).unwrap();
}

#[test]
fn test_privilege_denied_before_rewriting() {
    // Only `t` is granted; the unconstrained join would otherwise be
    // rejected by the cartesian guard.
    let d = doc(&format!(
        "{}privileges:\n  - {{ privilege: select, table: t }}\n",
        CROSS_JOIN
    ));
    let err = optimize(&d, OptimizerConfig::default().with_allow_cartesian_product(false)).unwrap_err();
    match err {
        Error::PrivilegeDenied {
            privilege, db, table, ..
        } => {
            assert_eq!(privilege, Privilege::Select);
            assert_eq!(db, "test");
            assert_eq!(table, "s");
        }
        other => panic!("expected privilege denial, got {other}"),
    }
}

#[test]
fn test_database_wide_grant_allows_query() {
    let d = doc(&format!("{}privileges:\n  - {{ privilege: select }}\n", CROSS_JOIN));
    assert!(optimize_default(&d).is_ok());
}

#[test]
fn test_column_pruning_only() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: project
    columns: [a]
    input: { op: scan, table: t }
"#);
    let config = OptimizerConfig::default().with_rule_flags(RuleFlags::PRUNE_COLUMNS);
    let plan = optimize(&d, config).unwrap();
    let p = physical(&plan);
    // The projection became an identity once the scan was pruned.
    assert_eq!(p.op_names(), vec!["Reader", "TableScan"]);
    let scan = &p.children[0];
    assert_eq!(scan.schema.len(), 1);
    assert_eq!(scan.schema.fields[0].name, "a");
    assert_eq!(p.schema.len(), 1);
}

#[test]
fn test_no_rules_keeps_full_scan_width() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: project
    columns: [a]
    input: { op: scan, table: t }
"#);
    let config = OptimizerConfig::default().with_rule_flags(RuleFlags::empty());
    let plan = optimize(&d, config).unwrap();
    let p = physical(&plan);
    assert_eq!(p.op_names()[0], "Projection");
    let leaf = p.children[0].children[0].schema.len();
    assert_eq!(leaf, 3);
}

#[test]
fn test_insert_and_ddl_pass_through() {
    let d = doc("statement: { kind: insert, table: t, columns: [a, b], rows: 3 }\n");
    let plan = optimize_default(&d).unwrap();
    match plan {
        Plan::Insert(insert) => {
            assert_eq!(insert.table, "t");
            assert_eq!(insert.rows, 3);
        }
        other => panic!("expected insert, got {}", other.kind()),
    }

    let d = doc("statement: { kind: ddl, statement: \"create index idx_c on t (c)\", table: t }\n");
    assert!(matches!(optimize_default(&d).unwrap(), Plan::Ddl(_)));
}

#[test]
fn test_ddl_privilege_follows_statement_verb() {
    let d = doc(
        "statement: { kind: ddl, statement: \"drop table t\", table: t }\nprivileges:\n  - { privilege: select }\n",
    );
    match optimize_default(&d).unwrap_err() {
        Error::PrivilegeDenied { privilege, .. } => assert_eq!(privilege, Privilege::Drop),
        other => panic!("expected privilege denial, got {other}"),
    }
}

#[test]
fn test_execute_optimizes_prepared_statement() {
    let d = doc(r#"
statement: { kind: execute, name: by_b }
prepared:
  by_b:
    kind: select
    query:
      op: filter
      condition: "b = 7"
      input: { op: scan, table: t }
"#);
    let plan = optimize_default(&d).unwrap();
    let Plan::Execute(exec) = plan else {
        panic!("expected execute");
    };
    assert_eq!(exec.name, "by_b");
    let inner = exec.plan.as_deref().and_then(Plan::as_physical).expect("prepared plan attached");
    assert!(inner.contains_op("IndexLookUp"));
}

#[test]
fn test_execute_unknown_statement_fails() {
    let d = doc("statement: { kind: execute, name: missing }\n");
    let err = optimize_default(&d).unwrap_err();
    assert!(matches!(err.root(), Error::Plan(msg) if msg.contains("missing")));
}

#[test]
fn test_execute_checks_prepared_privileges() {
    let d = doc(r#"
statement: { kind: execute, name: q }
prepared:
  q:
    kind: select
    query: { op: scan, table: s }
privileges:
  - { privilege: select, table: t }
"#);
    match optimize_default(&d).unwrap_err() {
        Error::PrivilegeDenied { table, .. } => assert_eq!(table, "s"),
        other => panic!("expected privilege denial, got {other}"),
    }
}
