//! YAML query documents.
//!
//! A document carries an in-line catalog, the statement to plan and any
//! prepared statements it may execute. [`YamlPlanBuilder`] turns a
//! statement into a plan, resolving names against the catalog.

pub mod expr;
pub mod yaml;

use thiserror::Error;

use sqlopt_core::error::Error;

pub use yaml::{parse_query, QueryDoc, Statement, YamlPlanBuilder};

#[derive(Debug, Error)]
pub enum DslError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("expression {expr:?}: {msg}")]
    Expr { expr: String, msg: String },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("unknown data type '{0}'")]
    UnknownType(String),

    #[error("{0}")]
    Invalid(String),
}

impl DslError {
    pub(crate) fn expr(expr: &str, msg: impl Into<String>) -> Self {
        DslError::Expr {
            expr: expr.to_string(),
            msg: msg.into(),
        }
    }
}

impl From<DslError> for Error {
    fn from(e: DslError) -> Self {
        Error::Build(e.to_string())
    }
}
