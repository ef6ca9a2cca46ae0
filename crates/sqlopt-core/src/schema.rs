//! Logical schema types. Pure data.
//!
//! A `Schema` is the ordered list of output columns of a plan node plus the
//! unique keys known to hold over those columns. Keys are filled in by the
//! key-info rule; an empty key means "at most one row".

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::ColumnRef;
use crate::id::ColumnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Date64,
    Decimal128,
}

impl DataType {
    /// Rough encoded width, used by the cost model.
    pub fn width(self) -> f64 {
        match self {
            DataType::Boolean => 1.0,
            DataType::Int32 | DataType::Float32 => 4.0,
            DataType::Int64 | DataType::Float64 | DataType::Date64 => 8.0,
            DataType::Decimal128 => 16.0,
            DataType::Utf8 | DataType::Binary => 16.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: ColumnId,
    pub name: String,
    /// Table (or alias) the column came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(id: ColumnId, name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            qualifier: None,
            data_type,
            nullable,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef::new(self.id, self.name.clone())
    }

    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", q, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.qualified_name(), self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    /// Unique keys over `fields`, each a set of column ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Vec<ColumnId>>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            keys: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    pub fn field_by_id(&self, id: ColumnId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn ids(&self) -> Vec<ColumnId> {
        self.fields.iter().map(|f| f.id).collect()
    }

    pub fn id_set(&self) -> HashSet<ColumnId> {
        self.fields.iter().map(|f| f.id).collect()
    }

    /// Concatenate two schemas (join output). Keys are not carried over.
    pub fn merge(left: &Schema, right: &Schema) -> Schema {
        let mut fields = left.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Schema::new(fields)
    }

    /// Mark every column nullable (null-supplying side of an outer join).
    pub fn into_nullable(mut self) -> Schema {
        for f in &mut self.fields {
            f.nullable = true;
        }
        self
    }

    /// Keep only the fields whose id satisfies `keep`, dropping keys that
    /// lose a column.
    pub fn retain(&mut self, mut keep: impl FnMut(ColumnId) -> bool) {
        self.fields.retain(|f| keep(f.id));
        let ids = self.id_set();
        self.keys.retain(|k| k.iter().all(|c| ids.contains(c)));
    }

    /// Copy over the keys of `old` that are still expressible in `self`.
    pub fn keep_keys_from(&mut self, old: &Schema) {
        let ids = self.id_set();
        for key in &old.keys {
            if key.iter().all(|c| ids.contains(c)) && !self.keys.contains(key) {
                self.keys.push(key.clone());
            }
        }
    }

    /// True when some unique key is a subset of `cols`.
    pub fn has_key_within(&self, cols: &HashSet<ColumnId>) -> bool {
        self.keys.iter().any(|k| k.iter().all(|c| cols.contains(c)))
    }

    /// True when the schema is known to produce at most one row.
    pub fn max_one_row(&self) -> bool {
        self.keys.iter().any(|k| k.is_empty())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.fields.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
