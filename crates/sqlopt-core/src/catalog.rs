//! Catalog metadata and the collaborator traits that serve it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::DataType;
use crate::stats::TableStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed column names, leading column first.
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexInfo {
    pub fn leading_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub db: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    /// Integer primary key column that doubles as the row handle; rows are
    /// stored in its order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_is_handle: Option<String>,
}

impl TableInfo {
    pub fn new(db: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            db: db.into(),
            name: name.into(),
            columns,
            indexes: Vec::new(),
            pk_is_handle: None,
        }
    }

    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_pk_handle(mut self, column: impl Into<String>) -> Self {
        self.pk_is_handle = Some(column.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.db, self.name)
    }
}

/// Read-only table lookup used by plan builders.
pub trait Catalog {
    fn table(&self, db: &str, name: &str) -> Option<Arc<TableInfo>>;
}

/// External statistics source. `Ok(None)` means "no statistics"; the
/// planner then uses pseudo statistics.
pub trait StatsProvider: Send + Sync {
    fn table_stats(&self, table: &TableInfo) -> Result<Option<TableStats>>;
}

/// In-memory catalog holding table metadata and optional statistics.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: HashMap<(String, String), Arc<TableInfo>>,
    stats: HashMap<(String, String), TableStats>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableInfo) -> Arc<TableInfo> {
        let table = Arc::new(table);
        self.tables
            .insert((table.db.clone(), table.name.clone()), table.clone());
        table
    }

    pub fn set_stats(&mut self, db: &str, table: &str, stats: TableStats) {
        self.stats.insert((db.to_string(), table.to_string()), stats);
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableInfo>> {
        self.tables.values()
    }
}

impl Catalog for MemoryCatalog {
    fn table(&self, db: &str, name: &str) -> Option<Arc<TableInfo>> {
        self.tables.get(&(db.to_string(), name.to_string())).cloned()
    }
}

impl StatsProvider for MemoryCatalog {
    fn table_stats(&self, table: &TableInfo) -> Result<Option<TableStats>> {
        Ok(self
            .stats
            .get(&(table.db.clone(), table.name.clone()))
            .cloned())
    }
}
