//! Top-level plan handed to and returned by the optimizer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::logical::LogicalPlan;
use crate::physical::PhysicalPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Plan {
    Logical(Arc<LogicalPlan>),
    Physical(PhysicalPlan),
    /// Run a prepared statement by name.
    Execute(Execute),
    Insert(Insert),
    Ddl(Ddl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execute {
    pub name: String,
    /// Optimized plan of the prepared statement, attached by the optimizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Box<Plan>>,
}

impl Execute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plan: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub db: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ddl {
    pub statement: String,
}

impl Plan {
    pub fn kind(&self) -> &'static str {
        match self {
            Plan::Logical(_) => "logical",
            Plan::Physical(_) => "physical",
            Plan::Execute(_) => "execute",
            Plan::Insert(_) => "insert",
            Plan::Ddl(_) => "ddl",
        }
    }

    pub fn as_logical(&self) -> Option<&Arc<LogicalPlan>> {
        match self {
            Plan::Logical(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_physical(&self) -> Option<&PhysicalPlan> {
        match self {
            Plan::Physical(p) => Some(p),
            _ => None,
        }
    }

    pub fn explain(&self) -> String {
        match self {
            Plan::Logical(p) => p.explain(),
            Plan::Physical(p) => p.explain(),
            Plan::Execute(e) => match &e.plan {
                Some(inner) => format!("Execute {}\n{}", e.name, inner.explain()),
                None => format!("Execute {}\n", e.name),
            },
            Plan::Insert(i) => format!(
                "Insert {}.{} ({}) rows:{}\n",
                i.db,
                i.table,
                i.columns.join(", "),
                i.rows
            ),
            Plan::Ddl(d) => format!("Ddl {}\n", d.statement),
        }
    }
}
