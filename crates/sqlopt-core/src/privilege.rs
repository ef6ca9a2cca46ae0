//! Privilege records collected while building a plan, and the collaborator
//! that verifies them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Index,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Create => "CREATE",
            Privilege::Drop => "DROP",
            Privilege::Alter => "ALTER",
            Privilege::Index => "INDEX",
        };
        f.write_str(s)
    }
}

/// One object the statement touches. Empty `table`/`column` mean the whole
/// database/table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitInfo {
    pub privilege: Privilege,
    pub db: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub column: String,
}

impl VisitInfo {
    pub fn new(privilege: Privilege, db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            privilege,
            db: db.into(),
            table: table.into(),
            column: String::new(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

/// External privilege checker. Must be callable from concurrent
/// optimizations.
pub trait PrivilegeManager: Send + Sync {
    fn request_verification(&self, db: &str, table: &str, column: &str, privilege: Privilege) -> bool;
}

/// Grants every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PrivilegeManager for AllowAll {
    fn request_verification(&self, _: &str, _: &str, _: &str, _: Privilege) -> bool {
        true
    }
}

/// Grants only the listed (privilege, db, table) triples; an empty table
/// grants the whole database.
#[derive(Debug, Default, Clone)]
pub struct StaticGrants {
    grants: Vec<(Privilege, String, String)>,
}

impl StaticGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, privilege: Privilege, db: impl Into<String>, table: impl Into<String>) -> Self {
        self.grants.push((privilege, db.into(), table.into()));
        self
    }
}

impl PrivilegeManager for StaticGrants {
    fn request_verification(&self, db: &str, table: &str, _column: &str, privilege: Privilege) -> bool {
        self.grants
            .iter()
            .any(|(p, d, t)| *p == privilege && d == db && (t.is_empty() || t == table))
    }
}
