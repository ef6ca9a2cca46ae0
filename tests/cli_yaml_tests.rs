//! YAML query document parsing and validation tests

mod common;

use common::{doc, logical, CATALOG};
use sqlopt_core::logical::{IndexHint, LogicalPlan};
use sqlopt_core::catalog::Catalog;
use sqlopt_planner::dsl::yaml::QueryNode;
use sqlopt_planner::dsl::{parse_query, DslError, Statement};

#[test]
fn test_parse_document_defaults() {
    let d = parse_query(
        r#"
catalog:
  tables:
    - name: t
      columns:
        - { name: a, type: int }
statement:
  kind: select
  query: { op: scan, table: t }
"#,
    )
    .unwrap();
    assert_eq!(d.db, "test");
    assert!(d.prepared.is_empty());
    assert!(d.privileges.is_none());
    assert!(d.catalog.tables[0].columns[0].nullable);
    let catalog = d.catalog().unwrap();
    let ctx = d.session(&catalog);
    assert!(ctx.privilege_manager().is_none());
    assert!(ctx.stats_provider().is_some());
}

#[test]
fn test_parse_nested_query() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: limit
    count: 3
    offset: 1
    input:
      op: sort
      by: ["b DESC", a]
      input:
        op: filter
        condition: "b > 2"
        input: { op: scan, table: t }
"#);
    let Statement::Select { query } = &d.statement else {
        panic!("expected select");
    };
    let QueryNode::Limit { count, offset, .. } = query else {
        panic!("expected limit");
    };
    assert_eq!((*count, *offset), (3, 1));
}

#[test]
fn test_unknown_op_rejected() {
    let err = parse_query(&format!("{}statement: {{ kind: select, query: {{ op: window }} }}\n", CATALOG)).unwrap_err();
    assert!(matches!(err, DslError::Yaml(_)));
}

#[test]
fn test_unknown_statement_kind_rejected() {
    let err = parse_query(&format!("{}statement: {{ kind: update, table: t }}\n", CATALOG)).unwrap_err();
    assert!(matches!(err, DslError::Yaml(_)));
}

#[test]
fn test_unknown_type_rejected() {
    let d = parse_query(
        r#"
catalog:
  tables:
    - name: t
      columns:
        - { name: a, type: money }
statement: { kind: select, query: { op: scan, table: t } }
"#,
    )
    .unwrap();
    assert!(matches!(d.catalog(), Err(DslError::UnknownType(t)) if t == "money"));
}

#[test]
fn test_index_on_missing_column_rejected() {
    let d = parse_query(
        r#"
catalog:
  tables:
    - name: t
      columns:
        - { name: a, type: int64 }
      indexes:
        - { name: idx_z, columns: [z] }
statement: { kind: select, query: { op: scan, table: t } }
"#,
    )
    .unwrap();
    assert!(matches!(d.catalog(), Err(DslError::UnknownColumn(_))));
}

#[test]
fn test_scan_hints_and_alias() {
    let d = doc("statement: { kind: select, query: { op: scan, table: t, alias: x, ignore_index: [idx_b] } }\n");
    let plan = logical(&d);
    let LogicalPlan::Scan(scan) = plan.as_ref() else {
        panic!("expected scan");
    };
    assert_eq!(scan.display_name(), "test.t as x");
    assert!(matches!(&scan.hint, Some(IndexHint::IgnoreIndex(names)) if names == &["idx_b".to_string()]));
    assert!(scan.schema.fields.iter().all(|f| f.qualifier.as_deref() == Some("x")));
}

#[test]
fn test_statistics_loaded_into_catalog() {
    let d = doc("statement: { kind: select, query: { op: scan, table: t } }\n");
    let catalog = d.catalog().unwrap();
    let ctx = d.session(&catalog);
    let provider = ctx.stats_provider().unwrap();
    let t = catalog.table("test", "t").unwrap();
    let stats = provider.table_stats(&t).unwrap().unwrap();
    assert_eq!(stats.row_count, 10000.0);
    assert_eq!(stats.distinct("b"), 1000.0);
    let s = catalog.table("test", "s").unwrap();
    assert!(provider.table_stats(&s).unwrap().is_none());
}

#[test]
fn test_demo_documents_optimize() {
    use sqlopt_core::config::OptimizerConfig;
    use sqlopt_core::error::Error;

    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
    for name in ["orders.yaml", "correlated.yaml", "prepared.yaml", "cartesian.yaml"] {
        let src = std::fs::read_to_string(dir.join(name)).unwrap();
        let d = parse_query(&src).unwrap();
        let plan = common::optimize(&d, OptimizerConfig::default());
        assert!(plan.is_ok(), "{}: {}", name, plan.unwrap_err());
    }

    let src = std::fs::read_to_string(dir.join("cartesian.yaml")).unwrap();
    let d = parse_query(&src).unwrap();
    let err = common::optimize(&d, OptimizerConfig::default().with_allow_cartesian_product(false)).unwrap_err();
    assert!(matches!(err, Error::CartesianProductUnsupported));
}
