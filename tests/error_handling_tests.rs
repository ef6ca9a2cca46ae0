//! Error classification, context chains and suggestions

mod common;

use common::{doc, optimize, optimize_default};
use sqlopt_core::config::{OptimizerConfig, RuleFlags};
use sqlopt_core::error::Error;
use sqlopt_core::privilege::{AllowAll, Privilege, PrivilegeManager, StaticGrants, VisitInfo};
use sqlopt_planner::optimizer::check_privilege;

#[test]
fn test_error_with_context() {
    let err = Error::Schema("unknown column 'xyz'".to_string())
        .with_context("logical rule 'column_prune'")
        .with_context("query optimization");

    assert_eq!(err.contexts(), vec!["query optimization", "logical rule 'column_prune'"]);
    assert!(matches!(err.root(), Error::Schema(_)));
    let msg = err.to_string();
    assert!(msg.contains("query optimization"));
}

#[test]
fn test_schema_error_suggestions() {
    let err = Error::Schema("unknown column 'xyz'".to_string());
    assert!(err.suggestions().iter().any(|s| s.contains("column")));
}

#[test]
fn test_rule_flag_config_error_suggestions() {
    let err = RuleFlags::parse("0x1ff").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.suggestions().iter().any(|s| s.contains("256")));
}

#[test]
fn test_suggestions_survive_context() {
    let err = Error::CartesianProductUnsupported.with_context("outer");
    assert_eq!(err.suggestions().len(), 2);
    assert!(err.is_user_error());
}

#[test]
fn test_privilege_denied_message() {
    let err = Error::PrivilegeDenied {
        privilege: Privilege::Select,
        db: "test".into(),
        table: "s".into(),
        column: String::new(),
    };
    assert_eq!(err.to_string(), "SELECT command denied on 'test.s'");
    assert!(err.is_user_error());
}

#[test]
fn test_first_denied_visit_is_reported() {
    let grants = StaticGrants::new().grant(Privilege::Select, "test", "t");
    let visits = vec![
        VisitInfo::new(Privilege::Select, "test", "t"),
        VisitInfo::new(Privilege::Insert, "test", "t"),
        VisitInfo::new(Privilege::Select, "test", "s"),
    ];
    match check_privilege(Some(&grants as &dyn PrivilegeManager), &visits).unwrap_err() {
        Error::PrivilegeDenied { privilege, table, .. } => {
            assert_eq!(privilege, Privilege::Insert);
            assert_eq!(table, "t");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(check_privilege(None, &visits).is_ok());
    assert!(check_privilege(Some(&AllowAll as &dyn PrivilegeManager), &visits).is_ok());
}

#[test]
fn test_unknown_column_is_build_error() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: filter
    condition: "zz > 1"
    input: { op: scan, table: t }
"#);
    let err = optimize_default(&d).unwrap_err();
    assert!(matches!(err.root(), Error::Build(msg) if msg.contains("zz")));
    assert_eq!(err.contexts(), vec!["plan build"]);
    assert!(!err.is_user_error());
}

#[test]
fn test_ambiguous_column_is_build_error() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: join
    on: "a = a"
    left: { op: scan, table: t }
    right: { op: scan, table: t, alias: t2 }
"#);
    let err = optimize_default(&d).unwrap_err();
    assert!(matches!(err.root(), Error::Build(msg) if msg.contains("ambiguous")));
}

#[test]
fn test_unknown_table_is_build_error() {
    let d = doc("statement: { kind: select, query: { op: scan, table: nope } }\n");
    let err = optimize_default(&d).unwrap_err();
    assert!(matches!(err.root(), Error::Build(msg) if msg.contains("nope")));
}

#[test]
fn test_user_errors_are_not_wrapped() {
    let d = doc(r#"
statement:
  kind: select
  query:
    op: join
    left: { op: scan, table: t }
    right: { op: scan, table: s }
privileges: []
"#);
    let err = optimize(&d, OptimizerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::PrivilegeDenied { .. }));
    assert!(err.contexts().is_empty());
}
