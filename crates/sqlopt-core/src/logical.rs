//! Logical plan tree.
//!
//! Children are held in `Arc`s so rewrites reuse untouched subtrees. Every
//! node's schema is kept consistent with its children: pass-through nodes
//! (Selection, Sort, Limit, TopN) expose their input's schema directly and
//! nodes that own a schema recompute it when rebuilt.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::TableInfo;
use crate::expr::{AggCall, ColumnRef, Expr, SortItem};
use crate::id::ColumnId;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    Semi,
    AntiSemi,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::RightOuter)
    }

    pub fn name(self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::LeftOuter => "left outer",
            JoinType::RightOuter => "right outer",
            JoinType::Semi => "semi",
            JoinType::AntiSemi => "anti semi",
        }
    }
}

/// Restriction of the access paths a scan may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexHint {
    UseIndex(Vec<String>),
    IgnoreIndex(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub table: Arc<TableInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Columns read from the table; field names are table column names.
    pub schema: Schema,
    /// Conditions pushed into the scan.
    #[serde(default)]
    pub filters: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<IndexHint>,
}

impl Scan {
    pub fn display_name(&self) -> String {
        match &self.alias {
            Some(a) if *a != self.table.name => format!("{} as {}", self.table.qualified_name(), a),
            _ => self.table.qualified_name(),
        }
    }

    /// Table column name behind an output column id.
    pub fn column_name(&self, id: ColumnId) -> Option<&str> {
        self.schema.field_by_id(id).map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub left: Arc<LogicalPlan>,
    pub right: Arc<LogicalPlan>,
    pub join_type: JoinType,
    /// `left = right` column pairs.
    #[serde(default)]
    pub equal_conditions: Vec<(ColumnRef, ColumnRef)>,
    /// ON-clause conditions over left columns only.
    #[serde(default)]
    pub left_conditions: Vec<Expr>,
    /// ON-clause conditions over right columns only.
    #[serde(default)]
    pub right_conditions: Vec<Expr>,
    #[serde(default)]
    pub other_conditions: Vec<Expr>,
    pub schema: Schema,
}

impl Join {
    pub fn new(left: Arc<LogicalPlan>, right: Arc<LogicalPlan>, join_type: JoinType) -> Self {
        let schema = join_schema(left.schema(), right.schema(), join_type);
        Self {
            left,
            right,
            join_type,
            equal_conditions: Vec::new(),
            left_conditions: Vec::new(),
            right_conditions: Vec::new(),
            other_conditions: Vec::new(),
            schema,
        }
    }

    pub fn with_equal(mut self, left: ColumnRef, right: ColumnRef) -> Self {
        self.equal_conditions.push((left, right));
        self
    }

    pub fn with_other(mut self, cond: Expr) -> Self {
        self.other_conditions.push(cond);
        self
    }

    /// Same join over new inputs and/or type, schema recomputed.
    pub fn rebuild(&self, left: Arc<LogicalPlan>, right: Arc<LogicalPlan>, join_type: JoinType) -> Join {
        let mut schema = join_schema(left.schema(), right.schema(), join_type);
        schema.keep_keys_from(&self.schema);
        Join {
            left,
            right,
            join_type,
            equal_conditions: self.equal_conditions.clone(),
            left_conditions: self.left_conditions.clone(),
            right_conditions: self.right_conditions.clone(),
            other_conditions: self.other_conditions.clone(),
            schema,
        }
    }

    pub fn all_conditions(&self) -> impl Iterator<Item = &Expr> {
        self.left_conditions
            .iter()
            .chain(self.right_conditions.iter())
            .chain(self.other_conditions.iter())
    }
}

/// Output schema of a join of the given type.
pub fn join_schema(left: &Schema, right: &Schema, join_type: JoinType) -> Schema {
    match join_type {
        JoinType::Inner => Schema::merge(left, right),
        JoinType::LeftOuter => Schema::merge(left, &right.clone().into_nullable()),
        JoinType::RightOuter => Schema::merge(&left.clone().into_nullable(), right),
        JoinType::Semi | JoinType::AntiSemi => Schema::new(left.fields.clone()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub input: Arc<LogicalPlan>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    /// One output column per aggregate call, in order.
    pub aggs: Vec<AggCall>,
    pub schema: Schema,
}

impl Aggregation {
    /// Output ids that carry the group-by columns (through `firstrow`).
    pub fn group_output_ids(&self) -> Option<Vec<ColumnId>> {
        let mut out = Vec::with_capacity(self.group_by.len());
        for g in &self.group_by {
            let col = g.as_column()?;
            let pos = self.aggs.iter().position(|a| {
                a.func == crate::expr::AggFunc::FirstRow
                    && a.args.first().and_then(Expr::as_column).map(|c| c.id) == Some(col.id)
            })?;
            out.push(self.schema.fields[pos].id);
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apply {
    pub outer: Arc<LogicalPlan>,
    /// May reference outer columns through `Expr::Correlated`.
    pub inner: Arc<LogicalPlan>,
    pub join_type: JoinType,
    #[serde(default)]
    pub conditions: Vec<Expr>,
    pub schema: Schema,
}

impl Apply {
    pub fn new(outer: Arc<LogicalPlan>, inner: Arc<LogicalPlan>, join_type: JoinType) -> Self {
        let schema = join_schema(outer.schema(), inner.schema(), join_type);
        Self {
            outer,
            inner,
            join_type,
            conditions: Vec::new(),
            schema,
        }
    }

    pub fn rebuild(&self, outer: Arc<LogicalPlan>, inner: Arc<LogicalPlan>) -> Apply {
        let mut schema = join_schema(outer.schema(), inner.schema(), self.join_type);
        schema.keep_keys_from(&self.schema);
        Apply {
            outer,
            inner,
            join_type: self.join_type,
            conditions: self.conditions.clone(),
            schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Scan(Scan),
    Selection {
        input: Arc<LogicalPlan>,
        conditions: Vec<Expr>,
    },
    Projection {
        input: Arc<LogicalPlan>,
        exprs: Vec<Expr>,
        schema: Schema,
    },
    Join(Join),
    Aggregation(Aggregation),
    Sort {
        input: Arc<LogicalPlan>,
        by: Vec<SortItem>,
    },
    Limit {
        input: Arc<LogicalPlan>,
        offset: u64,
        count: u64,
    },
    TopN {
        input: Arc<LogicalPlan>,
        by: Vec<SortItem>,
        offset: u64,
        count: u64,
    },
    Apply(Apply),
}

impl LogicalPlan {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalPlan::Scan(_) => "Scan",
            LogicalPlan::Selection { .. } => "Selection",
            LogicalPlan::Projection { .. } => "Projection",
            LogicalPlan::Join(_) => "Join",
            LogicalPlan::Aggregation(_) => "Aggregation",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::TopN { .. } => "TopN",
            LogicalPlan::Apply(_) => "Apply",
        }
    }

    pub fn schema(&self) -> &Schema {
        match self {
            LogicalPlan::Scan(s) => &s.schema,
            LogicalPlan::Projection { schema, .. } => schema,
            LogicalPlan::Join(j) => &j.schema,
            LogicalPlan::Aggregation(a) => &a.schema,
            LogicalPlan::Apply(a) => &a.schema,
            LogicalPlan::Selection { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::TopN { input, .. } => input.schema(),
        }
    }

    pub fn children(&self) -> Vec<&Arc<LogicalPlan>> {
        match self {
            LogicalPlan::Scan(_) => vec![],
            LogicalPlan::Join(j) => vec![&j.left, &j.right],
            LogicalPlan::Apply(a) => vec![&a.outer, &a.inner],
            LogicalPlan::Aggregation(a) => vec![&a.input],
            LogicalPlan::Selection { input, .. }
            | LogicalPlan::Projection { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::TopN { input, .. } => vec![input],
        }
    }

    /// Rebuild this node over new children (same arity, same order).
    pub fn with_children(&self, mut children: Vec<Arc<LogicalPlan>>) -> LogicalPlan {
        match self {
            LogicalPlan::Scan(_) => self.clone(),
            LogicalPlan::Join(j) if children.len() == 2 => {
                let right = children.pop().unwrap_or_else(|| j.right.clone());
                let left = children.pop().unwrap_or_else(|| j.left.clone());
                LogicalPlan::Join(j.rebuild(left, right, j.join_type))
            }
            LogicalPlan::Apply(a) if children.len() == 2 => {
                let inner = children.pop().unwrap_or_else(|| a.inner.clone());
                let outer = children.pop().unwrap_or_else(|| a.outer.clone());
                LogicalPlan::Apply(a.rebuild(outer, inner))
            }
            LogicalPlan::Join(_) | LogicalPlan::Apply(_) => self.clone(),
            _ => {
                let Some(input) = children.pop() else {
                    return self.clone();
                };
                match self {
                    LogicalPlan::Selection { conditions, .. } => LogicalPlan::Selection {
                        input,
                        conditions: conditions.clone(),
                    },
                    LogicalPlan::Projection { exprs, schema, .. } => LogicalPlan::Projection {
                        input,
                        exprs: exprs.clone(),
                        schema: schema.clone(),
                    },
                    LogicalPlan::Aggregation(a) => LogicalPlan::Aggregation(Aggregation {
                        input,
                        group_by: a.group_by.clone(),
                        aggs: a.aggs.clone(),
                        schema: a.schema.clone(),
                    }),
                    LogicalPlan::Sort { by, .. } => LogicalPlan::Sort {
                        input,
                        by: by.clone(),
                    },
                    LogicalPlan::Limit { offset, count, .. } => LogicalPlan::Limit {
                        input,
                        offset: *offset,
                        count: *count,
                    },
                    LogicalPlan::TopN {
                        by, offset, count, ..
                    } => LogicalPlan::TopN {
                        input,
                        by: by.clone(),
                        offset: *offset,
                        count: *count,
                    },
                    other => other.clone(),
                }
            }
        }
    }

    /// Expressions evaluated by this node itself (not its children).
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            LogicalPlan::Scan(s) => s.filters.iter().collect(),
            LogicalPlan::Selection { conditions, .. } => conditions.iter().collect(),
            LogicalPlan::Projection { exprs, .. } => exprs.iter().collect(),
            LogicalPlan::Join(j) => j.all_conditions().collect(),
            LogicalPlan::Aggregation(a) => a
                .group_by
                .iter()
                .chain(a.aggs.iter().flat_map(|c| c.args.iter()))
                .collect(),
            LogicalPlan::Sort { by, .. } | LogicalPlan::TopN { by, .. } => {
                by.iter().map(|s| &s.expr).collect()
            }
            LogicalPlan::Limit { .. } => vec![],
            LogicalPlan::Apply(a) => a.conditions.iter().collect(),
        }
    }

    /// Largest column id used anywhere in the tree.
    pub fn max_column_id(&self) -> ColumnId {
        let mut max = ColumnId::new(0);
        self.visit(&mut |node| {
            for f in &node.schema().fields {
                max = max.max(f.id);
            }
            for e in node.expressions() {
                if let Some(id) = e.max_column_id() {
                    max = max.max(id);
                }
            }
            if let LogicalPlan::Join(j) = node {
                for (l, r) in &j.equal_conditions {
                    max = max.max(l.id).max(r.id);
                }
            }
        });
        max
    }

    /// Pre-order walk.
    pub fn visit(&self, f: &mut dyn FnMut(&LogicalPlan)) {
        f(self);
        for c in self.children() {
            c.visit(f);
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.visit(&mut |_| n += 1);
        n
    }

    /// Indented text rendering, one node per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let _ = write!(out, "{}{}", pad, self.name());
        match self {
            LogicalPlan::Scan(s) => {
                let _ = write!(out, " {} {}", s.display_name(), s.schema);
                if !s.filters.is_empty() {
                    let _ = write!(out, " filters=[{}]", join_exprs(&s.filters));
                }
                match &s.hint {
                    Some(IndexHint::UseIndex(v)) => {
                        let _ = write!(out, " use_index({})", v.join(", "));
                    }
                    Some(IndexHint::IgnoreIndex(v)) => {
                        let _ = write!(out, " ignore_index({})", v.join(", "));
                    }
                    None => {}
                }
            }
            LogicalPlan::Selection { conditions, .. } => {
                let _ = write!(out, " [{}]", join_exprs(conditions));
            }
            LogicalPlan::Projection { exprs, schema, .. } => {
                let _ = write!(out, " [{}] -> {}", join_exprs(exprs), schema);
            }
            LogicalPlan::Join(j) => {
                let _ = write!(out, " {}", j.join_type.name());
                if !j.equal_conditions.is_empty() {
                    let eqs: Vec<String> = j
                        .equal_conditions
                        .iter()
                        .map(|(l, r)| format!("{} = {}", l, r))
                        .collect();
                    let _ = write!(out, " eq=[{}]", eqs.join(", "));
                }
                if !j.left_conditions.is_empty() {
                    let _ = write!(out, " left=[{}]", join_exprs(&j.left_conditions));
                }
                if !j.right_conditions.is_empty() {
                    let _ = write!(out, " right=[{}]", join_exprs(&j.right_conditions));
                }
                if !j.other_conditions.is_empty() {
                    let _ = write!(out, " other=[{}]", join_exprs(&j.other_conditions));
                }
            }
            LogicalPlan::Aggregation(a) => {
                let aggs: Vec<String> = a.aggs.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, " group_by=[{}] aggs=[{}]", join_exprs(&a.group_by), aggs.join(", "));
            }
            LogicalPlan::Sort { by, .. } => {
                let _ = write!(out, " [{}]", join_items(by));
            }
            LogicalPlan::Limit { offset, count, .. } => {
                let _ = write!(out, " offset={} count={}", offset, count);
            }
            LogicalPlan::TopN {
                by, offset, count, ..
            } => {
                let _ = write!(out, " [{}] offset={} count={}", join_items(by), offset, count);
            }
            LogicalPlan::Apply(a) => {
                let _ = write!(out, " {}", a.join_type.name());
                if !a.conditions.is_empty() {
                    let _ = write!(out, " [{}]", join_exprs(&a.conditions));
                }
            }
        }
        out.push('\n');
        for c in self.children() {
            c.explain_into(out, depth + 1);
        }
    }
}

pub(crate) fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn join_items(items: &[SortItem]) -> String {
    items
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
