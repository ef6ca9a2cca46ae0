//! YAML query documents and the plan builder for them.
//!
//! Example:
//! ```yaml
//! db: shop
//! catalog:
//!   tables:
//!     - name: orders
//!       primary_key: id
//!       columns:
//!         - { name: id, type: int64, nullable: false }
//!         - { name: customer, type: int64 }
//!         - { name: total, type: float64 }
//!       indexes:
//!         - { name: idx_customer, columns: [customer] }
//!       stats:
//!         row_count: 100000
//!         columns:
//!           customer: { min: 1, max: 5000, distinct_count: 5000 }
//! statement:
//!   kind: select
//!   query:
//!     op: aggregate
//!     group_by: [customer]
//!     aggs: ["sum(total) AS spent"]
//!     input:
//!       op: filter
//!       condition: "customer < 100"
//!       input: { op: scan, table: orders }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sqlopt_core::catalog::{Catalog, ColumnInfo, IndexInfo, MemoryCatalog, TableInfo};
use sqlopt_core::config::RuleFlags;
use sqlopt_core::error::Result;
use sqlopt_core::expr::{AggCall, AggFunc, Expr, SortItem};
use sqlopt_core::id::ColumnIdGen;
use sqlopt_core::logical::{Aggregation, Apply, IndexHint, Join, JoinType, LogicalPlan, Scan};
use sqlopt_core::plan::{Ddl, Execute, Insert, Plan};
use sqlopt_core::privilege::{Privilege, StaticGrants, VisitInfo};
use sqlopt_core::schema::{DataType, Field, Schema};
use sqlopt_core::stats::{ColumnStats, TableStats};
use sqlopt_core::types::Scalar;

use super::expr::{parse, parse_aliased, parse_sort_item, Ast, Scope};
use super::DslError;
use crate::builder::{BuildOutput, PlanBuilder};
use crate::context::SessionContext;

fn default_db() -> String {
    "test".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rows() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDoc {
    /// Database for unqualified table names.
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default)]
    pub catalog: CatalogDef,
    pub statement: Statement,
    #[serde(default)]
    pub prepared: BTreeMap<String, Statement>,
    /// When present, only these grants are honoured.
    #[serde(default)]
    pub privileges: Option<Vec<GrantDef>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDef {
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub db: Option<String>,
    pub columns: Vec<ColumnDef>,
    /// Integer primary key stored as the row handle.
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub stats: Option<StatsDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsDef {
    pub row_count: f64,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnStatsDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatsDef {
    #[serde(default)]
    pub min: Option<serde_yaml::Value>,
    #[serde(default)]
    pub max: Option<serde_yaml::Value>,
    #[serde(default)]
    pub null_count: u64,
    #[serde(default)]
    pub distinct_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantDef {
    pub privilege: Privilege,
    #[serde(default)]
    pub db: Option<String>,
    /// Empty grants the whole database.
    #[serde(default)]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Select {
        query: QueryNode,
    },
    Insert {
        table: String,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default = "default_rows")]
        rows: usize,
    },
    Ddl {
        statement: String,
        #[serde(default)]
        table: Option<String>,
    },
    Execute {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Semi,
    Anti,
}

impl From<JoinKind> for JoinType {
    fn from(k: JoinKind) -> Self {
        match k {
            JoinKind::Inner => JoinType::Inner,
            JoinKind::Left => JoinType::LeftOuter,
            JoinKind::Right => JoinType::RightOuter,
            JoinKind::Semi => JoinType::Semi,
            JoinKind::Anti => JoinType::AntiSemi,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryNode {
    Scan {
        /// `name` or `db.name`.
        table: String,
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        use_index: Option<Vec<String>>,
        #[serde(default)]
        ignore_index: Option<Vec<String>>,
    },
    Filter {
        input: Box<QueryNode>,
        condition: String,
    },
    Project {
        input: Box<QueryNode>,
        /// `expr [AS name]` items.
        columns: Vec<String>,
    },
    Join {
        left: Box<QueryNode>,
        right: Box<QueryNode>,
        #[serde(default, rename = "type")]
        join_type: JoinKind,
        #[serde(default)]
        on: Option<String>,
    },
    Aggregate {
        input: Box<QueryNode>,
        #[serde(default)]
        group_by: Vec<String>,
        /// `func(args) [AS name]` items.
        #[serde(default)]
        aggs: Vec<String>,
    },
    Sort {
        input: Box<QueryNode>,
        /// `expr [ASC|DESC]` items.
        by: Vec<String>,
    },
    Limit {
        input: Box<QueryNode>,
        count: u64,
        #[serde(default)]
        offset: u64,
    },
    /// Correlated subquery: `inner` may reference `outer` columns.
    Apply {
        outer: Box<QueryNode>,
        inner: Box<QueryNode>,
        #[serde(default, rename = "type")]
        join_type: JoinKind,
        #[serde(default)]
        on: Option<String>,
    },
}

/// Parse a query document.
pub fn parse_query(src: &str) -> std::result::Result<QueryDoc, DslError> {
    Ok(serde_yaml::from_str(src)?)
}

fn parse_type(s: &str) -> std::result::Result<DataType, DslError> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "bool" | "boolean" => DataType::Boolean,
        "int32" | "int" | "integer" => DataType::Int32,
        "int64" | "bigint" => DataType::Int64,
        "float32" | "float" => DataType::Float32,
        "float64" | "double" => DataType::Float64,
        "utf8" | "string" | "text" | "varchar" => DataType::Utf8,
        "binary" | "bytes" | "blob" => DataType::Binary,
        "date" | "date64" | "datetime" => DataType::Date64,
        "decimal" | "decimal128" => DataType::Decimal128,
        _ => return Err(DslError::UnknownType(s.to_string())),
    })
}

fn yaml_scalar(v: &serde_yaml::Value) -> std::result::Result<Scalar, DslError> {
    use serde_yaml::Value;
    match v {
        Value::Null => Ok(Scalar::Null),
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Scalar::I64)
            .or_else(|| n.as_f64().map(Scalar::F64))
            .ok_or_else(|| DslError::Invalid(format!("unsupported number {}", n))),
        Value::String(s) => Ok(Scalar::Str(s.clone())),
        other => Err(DslError::Invalid(format!("unsupported statistics value {:?}", other))),
    }
}

impl TableDef {
    fn to_table(&self, default_db: &str) -> std::result::Result<(TableInfo, Option<TableStats>), DslError> {
        let columns = self
            .columns
            .iter()
            .map(|c| Ok(ColumnInfo::new(&c.name, parse_type(&c.data_type)?, c.nullable)))
            .collect::<std::result::Result<Vec<_>, DslError>>()?;
        let db = self.db.as_deref().unwrap_or(default_db);
        let mut table = TableInfo::new(db, &self.name, columns);
        let missing = |col: &str| DslError::UnknownColumn(format!("{}.{}", self.name, col));
        if let Some(pk) = &self.primary_key {
            table.column(pk).ok_or_else(|| missing(pk))?;
            table = table.with_pk_handle(pk);
        }
        for idx in &self.indexes {
            if let Some(c) = idx.columns.iter().find(|c| table.column(c).is_none()) {
                return Err(missing(c));
            }
            table = table.with_index(IndexInfo {
                name: idx.name.clone(),
                columns: idx.columns.clone(),
                unique: idx.unique,
            });
        }

        let stats = match &self.stats {
            None => None,
            Some(def) => {
                let mut stats = TableStats::new(def.row_count);
                for (name, cs) in &def.columns {
                    table.column(name).ok_or_else(|| missing(name))?;
                    let column = ColumnStats {
                        min: cs.min.as_ref().map(yaml_scalar).transpose()?,
                        max: cs.max.as_ref().map(yaml_scalar).transpose()?,
                        null_count: cs.null_count,
                        distinct_count: cs.distinct_count,
                        total_count: def.row_count.max(0.0) as u64,
                    };
                    stats = stats.with_column(name, column);
                }
                Some(stats)
            }
        };
        Ok((table, stats))
    }
}

impl QueryDoc {
    /// In-memory catalog (with statistics) described by the document.
    pub fn catalog(&self) -> std::result::Result<MemoryCatalog, DslError> {
        let mut catalog = MemoryCatalog::new();
        for def in &self.catalog.tables {
            let (table, stats) = def.to_table(&self.db)?;
            let (db, name) = (table.db.clone(), table.name.clone());
            catalog.add_table(table);
            if let Some(stats) = stats {
                catalog.set_stats(&db, &name, stats);
            }
        }
        Ok(catalog)
    }

    /// Session for this document: current database, prepared statements,
    /// grants, and `catalog` as the statistics source.
    pub fn session(&self, catalog: &MemoryCatalog) -> SessionContext<Statement> {
        let mut ctx = SessionContext::new(self.db.clone()).with_stats_provider(Arc::new(catalog.clone()));
        if let Some(grants) = &self.privileges {
            let manager = grants.iter().fold(StaticGrants::new(), |m, g| {
                m.grant(g.privilege, g.db.clone().unwrap_or_else(|| self.db.clone()), g.table.clone())
            });
            ctx = ctx.with_privilege_manager(Arc::new(manager));
        }
        for (name, stmt) in &self.prepared {
            ctx.prepare(name.clone(), stmt.clone());
        }
        ctx
    }
}

/// Builds plans from [`Statement`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlPlanBuilder;

impl PlanBuilder for YamlPlanBuilder {
    type Node = Statement;

    fn build(&self, ctx: &SessionContext<Statement>, node: &Statement, catalog: &dyn Catalog) -> Result<BuildOutput> {
        let mut b = Build {
            catalog,
            db: &ctx.current_db,
            ids: ColumnIdGen::starting_at(1),
            visits: Vec::new(),
            flags: RuleFlags::PRUNE_COLUMNS | RuleFlags::ELIMINATE_PROJECTION,
        };
        let plan = match node {
            Statement::Select { query } => Plan::Logical(b.node(query, &Scope::default())?),
            Statement::Insert { table, columns, rows } => {
                let info = b.table(table)?;
                if let Some(c) = columns.iter().find(|c| info.column(c).is_none()) {
                    return Err(DslError::UnknownColumn(format!("{}.{}", info.name, c)).into());
                }
                b.visits.push(VisitInfo::new(Privilege::Insert, &info.db, &info.name));
                Plan::Insert(Insert {
                    db: info.db.clone(),
                    table: info.name.clone(),
                    columns: columns.clone(),
                    rows: *rows,
                })
            }
            Statement::Ddl { statement, table } => {
                let privilege = match statement.split_whitespace().next().map(str::to_ascii_lowercase).as_deref() {
                    Some("drop") => Privilege::Drop,
                    Some("alter") => Privilege::Alter,
                    Some("create") if statement.to_ascii_lowercase().contains(" index ") => Privilege::Index,
                    _ => Privilege::Create,
                };
                let (db, name) = split_name(b.db, table.as_deref().unwrap_or(""));
                b.visits.push(VisitInfo::new(privilege, db, name));
                Plan::Ddl(Ddl {
                    statement: statement.clone(),
                })
            }
            Statement::Execute { name } => Plan::Execute(Execute::new(name)),
        };
        debug!(kind = plan.kind(), visits = b.visits.len(), flags = b.flags.bits(), "statement built");
        Ok(BuildOutput {
            plan,
            visit_info: b.visits,
            flags: b.flags,
        })
    }
}

fn split_name<'a>(default_db: &'a str, name: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((db, table)) => (db, table),
        None => (default_db, name),
    }
}

fn output_name(ast: &Ast, alias: Option<String>) -> String {
    alias.unwrap_or_else(|| match ast {
        Ast::Ident { name, .. } => name.clone(),
        other => other.to_string(),
    })
}

struct Build<'c> {
    catalog: &'c dyn Catalog,
    db: &'c str,
    ids: ColumnIdGen,
    visits: Vec<VisitInfo>,
    flags: RuleFlags,
}

impl Build<'_> {
    fn table(&self, name: &str) -> std::result::Result<Arc<TableInfo>, DslError> {
        let (db, table) = split_name(self.db, name);
        self.catalog
            .table(db, table)
            .ok_or_else(|| DslError::UnknownTable(format!("{}.{}", db, table)))
    }

    fn condition(scope: &Scope<'_>, src: &str) -> std::result::Result<Vec<Expr>, DslError> {
        Ok(scope.resolve(&parse(src)?)?.split_conjunction())
    }

    fn node(&mut self, node: &QueryNode, outer: &Scope<'_>) -> std::result::Result<Arc<LogicalPlan>, DslError> {
        let plan = match node {
            QueryNode::Scan {
                table,
                alias,
                use_index,
                ignore_index,
            } => {
                let info = self.table(table)?;
                let qualifier = alias.clone().unwrap_or_else(|| info.name.clone());
                let fields = info
                    .columns
                    .iter()
                    .map(|c| Field::new(self.ids.next_id(), &c.name, c.data_type, c.nullable).with_qualifier(&qualifier))
                    .collect();
                let hint = match (use_index, ignore_index) {
                    (Some(_), Some(_)) => {
                        return Err(DslError::Invalid("a scan takes use_index or ignore_index, not both".into()))
                    }
                    (Some(names), None) => Some(IndexHint::UseIndex(names.clone())),
                    (None, Some(names)) => Some(IndexHint::IgnoreIndex(names.clone())),
                    (None, None) => None,
                };
                self.visits.push(VisitInfo::new(Privilege::Select, &info.db, &info.name));
                LogicalPlan::Scan(Scan {
                    table: info,
                    alias: alias.clone(),
                    schema: Schema::new(fields),
                    filters: Vec::new(),
                    hint,
                })
            }
            QueryNode::Filter { input, condition } => {
                let input = self.node(input, outer)?;
                let conditions = Self::condition(&outer.nested(input.schema()), condition)?;
                self.flags |= RuleFlags::PREDICATE_PUSH_DOWN;
                LogicalPlan::Selection { input, conditions }
            }
            QueryNode::Project { input, columns } => {
                let input = self.node(input, outer)?;
                let scope = outer.nested(input.schema());
                let mut exprs = Vec::with_capacity(columns.len());
                let mut fields = Vec::with_capacity(columns.len());
                for item in columns {
                    let (ast, alias) = parse_aliased(item)?;
                    let expr = scope.resolve(&ast)?;
                    let passthrough = match (&expr, &alias) {
                        (Expr::Column(c), None) => input.schema().field_by_id(c.id).cloned(),
                        _ => None,
                    };
                    let field = match passthrough {
                        Some(f) => f,
                        None => {
                            let (data_type, nullable) = scope.type_of(&expr);
                            Field::new(self.ids.next_id(), output_name(&ast, alias), data_type, nullable)
                        }
                    };
                    exprs.push(expr);
                    fields.push(field);
                }
                LogicalPlan::Projection {
                    input,
                    exprs,
                    schema: Schema::new(fields),
                }
            }
            QueryNode::Join {
                left,
                right,
                join_type,
                on,
            } => {
                let left = self.node(left, outer)?;
                let right = self.node(right, outer)?;
                let mut join = Join::new(left, right, (*join_type).into());
                if let Some(on) = on {
                    let merged = Schema::merge(join.left.schema(), join.right.schema());
                    let conds = Self::condition(&outer.nested(&merged), on)?;
                    classify_join_conditions(&mut join, conds);
                }
                self.flags |= RuleFlags::PREDICATE_PUSH_DOWN;
                LogicalPlan::Join(join)
            }
            QueryNode::Aggregate { input, group_by, aggs } => self.aggregate(input, group_by, aggs, outer)?,
            QueryNode::Sort { input, by } => {
                let input = self.node(input, outer)?;
                let scope = outer.nested(input.schema());
                let by = by
                    .iter()
                    .map(|s| {
                        let (ast, desc) = parse_sort_item(s)?;
                        Ok(SortItem::new(scope.resolve(&ast)?, desc))
                    })
                    .collect::<std::result::Result<Vec<_>, DslError>>()?;
                self.flags |= RuleFlags::PUSH_DOWN_TOP_N;
                LogicalPlan::Sort { input, by }
            }
            QueryNode::Limit { input, count, offset } => {
                let input = self.node(input, outer)?;
                self.flags |= RuleFlags::PUSH_DOWN_TOP_N;
                LogicalPlan::Limit {
                    input,
                    offset: *offset,
                    count: *count,
                }
            }
            QueryNode::Apply {
                outer: outer_node,
                inner,
                join_type,
                on,
            } => {
                let outer_plan = self.node(outer_node, outer)?;
                let inner_plan = self.node(inner, &outer.nested(outer_plan.schema()))?;
                let mut apply = Apply::new(outer_plan, inner_plan, (*join_type).into());
                if let Some(on) = on {
                    let merged = Schema::merge(apply.outer.schema(), apply.inner.schema());
                    apply.conditions = Self::condition(&outer.nested(&merged), on)?;
                }
                self.flags |= RuleFlags::DECORRELATE | RuleFlags::PREDICATE_PUSH_DOWN;
                LogicalPlan::Apply(apply)
            }
        };
        Ok(Arc::new(plan))
    }

    fn aggregate(
        &mut self,
        input: &QueryNode,
        group_by: &[String],
        aggs: &[String],
        outer: &Scope<'_>,
    ) -> std::result::Result<LogicalPlan, DslError> {
        let input = self.node(input, outer)?;
        let scope = outer.nested(input.schema());

        let mut group_exprs = Vec::with_capacity(group_by.len());
        let mut calls = Vec::with_capacity(group_by.len() + aggs.len());
        let mut fields = Vec::with_capacity(group_by.len() + aggs.len());
        for g in group_by {
            let expr = scope.resolve(&parse(g)?)?;
            let Expr::Column(col) = &expr else {
                return Err(DslError::expr(g, "group by takes column names"));
            };
            let source = input
                .schema()
                .field_by_id(col.id)
                .ok_or_else(|| DslError::UnknownColumn(g.clone()))?;
            let mut field = source.clone();
            field.id = self.ids.next_id();
            calls.push(AggCall::first_row(col.clone()));
            fields.push(field);
            group_exprs.push(expr);
        }
        for a in aggs {
            let (ast, alias) = parse_aliased(a)?;
            let call = scope.resolve_agg(&ast)?;
            let (data_type, nullable) = scope.agg_type(&call);
            if matches!(call.func, AggFunc::Min | AggFunc::Max) {
                self.flags |= RuleFlags::MAX_MIN_ELIMINATE;
            }
            fields.push(Field::new(self.ids.next_id(), output_name(&ast, alias), data_type, nullable));
            calls.push(call);
        }
        self.flags |= RuleFlags::BUILD_KEY_INFO | RuleFlags::AGGREGATION_OPTIMIZE;
        Ok(LogicalPlan::Aggregation(Aggregation {
            input,
            group_by: group_exprs,
            aggs: calls,
            schema: Schema::new(fields),
        }))
    }
}

/// Sort ON conjuncts into equality pairs, one-sided and other conditions.
fn classify_join_conditions(join: &mut Join, conds: Vec<Expr>) {
    let left = join.left.schema().id_set();
    let right = join.right.schema().id_set();
    for cond in conds {
        if let Some((a, b)) = cond.as_column_equality() {
            if left.contains(&a.id) && right.contains(&b.id) {
                join.equal_conditions.push((a.clone(), b.clone()));
                continue;
            }
            if left.contains(&b.id) && right.contains(&a.id) {
                join.equal_conditions.push((b.clone(), a.clone()));
                continue;
            }
        }
        let cols = cond.column_ids();
        if !cols.is_empty() && cols.is_subset(&left) {
            join.left_conditions.push(cond);
        } else if !cols.is_empty() && cols.is_subset(&right) {
            join.right_conditions.push(cond);
        } else {
            join.other_conditions.push(cond);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
db: test
catalog:
  tables:
    - name: t
      primary_key: a
      columns:
        - { name: a, type: int64, nullable: false }
        - { name: b, type: int64 }
      indexes:
        - { name: idx_b, columns: [b] }
    - name: s
      columns:
        - { name: c, type: int64 }
        - { name: d, type: utf8 }
statement:
  kind: select
  query:
    op: project
    columns: ["a", "d AS label"]
    input:
      op: join
      on: "t.a = s.c AND s.d IS NOT NULL"
      left: { op: scan, table: t }
      right: { op: scan, table: s }
"#;

    fn build(doc: &QueryDoc, stmt: &Statement) -> Result<BuildOutput> {
        let catalog = doc.catalog().unwrap();
        let ctx = doc.session(&catalog);
        YamlPlanBuilder.build(&ctx, stmt, &catalog)
    }

    #[test]
    fn select_builds_join_with_classified_conditions() {
        let doc = parse_query(DOC).unwrap();
        let out = build(&doc, &doc.statement).unwrap();
        assert_eq!(out.visit_info.len(), 2);
        assert!(out.flags.contains(RuleFlags::PREDICATE_PUSH_DOWN));
        let plan = out.plan.as_logical().unwrap();
        let LogicalPlan::Projection { input, schema, .. } = plan.as_ref() else {
            panic!("expected projection");
        };
        assert_eq!(schema.fields[1].name, "label");
        let LogicalPlan::Join(join) = input.as_ref() else {
            panic!("expected join");
        };
        assert_eq!(join.equal_conditions.len(), 1);
        assert_eq!(join.right_conditions.len(), 1);
    }

    #[test]
    fn unknown_names_are_build_errors() {
        let doc = parse_query(DOC).unwrap();
        let stmt: Statement = serde_yaml::from_str(
            "kind: select\nquery: { op: filter, condition: \"zz > 1\", input: { op: scan, table: t } }",
        )
        .unwrap();
        let err = build(&doc, &stmt).unwrap_err();
        assert!(err.to_string().contains("unknown column 'zz'"), "{err}");

        let stmt: Statement = serde_yaml::from_str("kind: select\nquery: { op: scan, table: nope }").unwrap();
        assert!(build(&doc, &stmt).is_err());
    }

    #[test]
    fn aggregate_outputs_group_columns_then_calls() {
        let doc = parse_query(DOC).unwrap();
        let stmt: Statement = serde_yaml::from_str(
            "kind: select\nquery: { op: aggregate, group_by: [b], aggs: [\"max(a) AS m\"], input: { op: scan, table: t } }",
        )
        .unwrap();
        let out = build(&doc, &stmt).unwrap();
        assert!(out.flags.contains(RuleFlags::MAX_MIN_ELIMINATE | RuleFlags::AGGREGATION_OPTIMIZE));
        let LogicalPlan::Aggregation(agg) = out.plan.as_logical().unwrap().as_ref() else {
            panic!("expected aggregation");
        };
        assert_eq!(agg.aggs[0].func, AggFunc::FirstRow);
        assert_eq!(agg.schema.fields[1].name, "m");
        assert!(agg.group_output_ids().is_some());
    }

    #[test]
    fn apply_inner_side_sees_outer_columns() {
        let doc = parse_query(DOC).unwrap();
        let stmt: Statement = serde_yaml::from_str(
            r#"
kind: select
query:
  op: apply
  type: semi
  outer: { op: scan, table: t }
  inner:
    op: filter
    condition: "c = a"
    input: { op: scan, table: s }
"#,
        )
        .unwrap();
        let out = build(&doc, &stmt).unwrap();
        assert!(out.flags.contains(RuleFlags::DECORRELATE));
        let LogicalPlan::Apply(apply) = out.plan.as_logical().unwrap().as_ref() else {
            panic!("expected apply");
        };
        let LogicalPlan::Selection { conditions, .. } = apply.inner.as_ref() else {
            panic!("expected selection");
        };
        assert!(conditions[0].has_correlated());
    }

    #[test]
    fn insert_and_ddl_record_privileges() {
        let doc = parse_query(DOC).unwrap();
        let stmt: Statement = serde_yaml::from_str("kind: insert\ntable: t\ncolumns: [a, b]\nrows: 2").unwrap();
        let out = build(&doc, &stmt).unwrap();
        assert_eq!(out.visit_info[0].privilege, Privilege::Insert);

        let stmt: Statement = serde_yaml::from_str("kind: ddl\nstatement: drop table t\ntable: t").unwrap();
        let out = build(&doc, &stmt).unwrap();
        assert_eq!(out.visit_info[0].privilege, Privilege::Drop);
        assert!(matches!(out.plan, Plan::Ddl(_)));
    }
}
