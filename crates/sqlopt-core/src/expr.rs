//! Scalar expressions over plan columns.
//!
//! Column references carry the `ColumnId` of the column they read plus its
//! name for display. Before finalization the `index` of a reference is
//! `None`; the resolution pass fills it with the column's position in the
//! relevant input schema.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::ColumnId;
use crate::types::Scalar;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub id: ColumnId,
    pub name: String,
    /// Position in the input row; set by the resolution pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ColumnRef {
    pub fn new(id: ColumnId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            index: None,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(idx) => write!(f, "{}@{}", self.name, idx),
            None => write!(f, "{}{}", self.name, self.id),
        }
    }
}

/// Binary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    // Comparison operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical operators
    And,
    Or,
    // Arithmetic operators
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    /// Parse a binary operator from a string.
    pub fn parse(op: &str) -> std::result::Result<Self, String> {
        match op {
            "==" | "=" => Ok(BinOp::Eq),
            "!=" | "<>" => Ok(BinOp::Ne),
            "<" => Ok(BinOp::Lt),
            "<=" => Ok(BinOp::Le),
            ">" => Ok(BinOp::Gt),
            ">=" => Ok(BinOp::Ge),
            "AND" | "and" | "&&" => Ok(BinOp::And),
            "OR" | "or" | "||" => Ok(BinOp::Or),
            "+" => Ok(BinOp::Add),
            "-" => Ok(BinOp::Sub),
            "*" => Ok(BinOp::Mul),
            "/" => Ok(BinOp::Div),
            _ => Err(format!("unknown binary operator: {}", op)),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// The operator that gives the same result with swapped operands.
    pub fn commute(self) -> Self {
        match self {
            BinOp::Lt => BinOp::Gt,
            BinOp::Le => BinOp::Ge,
            BinOp::Gt => BinOp::Lt,
            BinOp::Ge => BinOp::Le,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

/// Unary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    /// Parse a unary operator from a string.
    pub fn parse(op: &str) -> std::result::Result<Self, String> {
        match op.to_uppercase().as_str() {
            "NOT" | "!" => Ok(UnaryOp::Not),
            "ISNULL" | "IS NULL" => Ok(UnaryOp::IsNull),
            "ISNOTNULL" | "IS NOT NULL" => Ok(UnaryOp::IsNotNull),
            _ => Err(format!("unknown unary operator: {}", op)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column of the node's input.
    Column(ColumnRef),
    /// Column of an enclosing Apply's outer input.
    Correlated(ColumnRef),
    Literal(Scalar),
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        arg: Box<Expr>,
    },
}

impl Expr {
    pub fn column(col: ColumnRef) -> Self {
        Expr::Column(col)
    }

    pub fn lit(value: Scalar) -> Self {
        Expr::Literal(value)
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, arg: Expr) -> Self {
        Expr::UnaryOp {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(BinOp::Eq, left, right)
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Ids of (non-correlated) columns read by this expression.
    pub fn column_ids(&self) -> HashSet<ColumnId> {
        let mut out = HashSet::new();
        self.collect_ids(&mut out, false);
        out
    }

    /// Ids of outer columns read through correlated references.
    pub fn correlated_ids(&self) -> HashSet<ColumnId> {
        let mut out = HashSet::new();
        self.collect_ids(&mut out, true);
        out
    }

    fn collect_ids(&self, out: &mut HashSet<ColumnId>, correlated: bool) {
        match self {
            Expr::Column(c) if !correlated => {
                out.insert(c.id);
            }
            Expr::Correlated(c) if correlated => {
                out.insert(c.id);
            }
            Expr::Column(_) | Expr::Correlated(_) | Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_ids(out, correlated);
                right.collect_ids(out, correlated);
            }
            Expr::UnaryOp { arg, .. } => arg.collect_ids(out, correlated),
        }
    }

    pub fn has_correlated(&self) -> bool {
        match self {
            Expr::Correlated(_) => true,
            Expr::Column(_) | Expr::Literal(_) => false,
            Expr::BinaryOp { left, right, .. } => left.has_correlated() || right.has_correlated(),
            Expr::UnaryOp { arg, .. } => arg.has_correlated(),
        }
    }

    pub fn max_column_id(&self) -> Option<ColumnId> {
        match self {
            Expr::Column(c) | Expr::Correlated(c) => Some(c.id),
            Expr::Literal(_) => None,
            Expr::BinaryOp { left, right, .. } => left.max_column_id().max(right.max_column_id()),
            Expr::UnaryOp { arg, .. } => arg.max_column_id(),
        }
    }

    /// Replace column references by the mapped expressions. Unmapped
    /// columns and correlated references are kept.
    pub fn substitute(&self, map: &HashMap<ColumnId, Expr>) -> Expr {
        match self {
            Expr::Column(c) => map.get(&c.id).cloned().unwrap_or_else(|| self.clone()),
            Expr::Correlated(_) | Expr::Literal(_) => self.clone(),
            Expr::BinaryOp { op, left, right } => {
                Expr::binary(*op, left.substitute(map), right.substitute(map))
            }
            Expr::UnaryOp { op, arg } => Expr::unary(*op, arg.substitute(map)),
        }
    }

    /// Turn correlated references to `outer` columns into plain columns.
    pub fn decorrelate(&self, outer: &HashSet<ColumnId>) -> Expr {
        match self {
            Expr::Correlated(c) if outer.contains(&c.id) => Expr::Column(c.clone()),
            Expr::Column(_) | Expr::Correlated(_) | Expr::Literal(_) => self.clone(),
            Expr::BinaryOp { op, left, right } => {
                Expr::binary(*op, left.decorrelate(outer), right.decorrelate(outer))
            }
            Expr::UnaryOp { op, arg } => Expr::unary(*op, arg.decorrelate(outer)),
        }
    }

    /// Visit every column reference; the flag tells whether it is correlated.
    pub fn visit_refs_mut(
        &mut self,
        f: &mut dyn FnMut(&mut ColumnRef, bool) -> Result<()>,
    ) -> Result<()> {
        match self {
            Expr::Column(c) => f(c, false),
            Expr::Correlated(c) => f(c, true),
            Expr::Literal(_) => Ok(()),
            Expr::BinaryOp { left, right, .. } => {
                left.visit_refs_mut(f)?;
                right.visit_refs_mut(f)
            }
            Expr::UnaryOp { arg, .. } => arg.visit_refs_mut(f),
        }
    }

    /// Read-only counterpart of [`Expr::visit_refs_mut`].
    pub fn visit_refs(&self, f: &mut dyn FnMut(&ColumnRef, bool) -> Result<()>) -> Result<()> {
        match self {
            Expr::Column(c) => f(c, false),
            Expr::Correlated(c) => f(c, true),
            Expr::Literal(_) => Ok(()),
            Expr::BinaryOp { left, right, .. } => {
                left.visit_refs(f)?;
                right.visit_refs(f)
            }
            Expr::UnaryOp { arg, .. } => arg.visit_refs(f),
        }
    }

    /// Split `a AND b AND c` into its conjuncts.
    pub fn split_conjunction(self) -> Vec<Expr> {
        match self {
            Expr::BinaryOp {
                op: BinOp::And,
                left,
                right,
            } => {
                let mut out = left.split_conjunction();
                out.extend(right.split_conjunction());
                out
            }
            other => vec![other],
        }
    }

    /// Fold conjuncts back into one expression.
    pub fn conjoin(exprs: Vec<Expr>) -> Option<Expr> {
        exprs
            .into_iter()
            .reduce(|acc, e| Expr::binary(BinOp::And, acc, e))
    }

    /// `col = col` between two plain columns.
    pub fn as_column_equality(&self) -> Option<(&ColumnRef, &ColumnRef)> {
        match self {
            Expr::BinaryOp {
                op: BinOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(l), Expr::Column(r)) => Some((l, r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// `col OP literal` (or `literal OP col`, normalized) for a comparison.
    pub fn as_column_comparison(&self) -> Option<(&ColumnRef, BinOp, &Scalar)> {
        match self {
            Expr::BinaryOp { op, left, right } if op.is_comparison() => {
                match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(v)) => Some((c, *op, v)),
                    (Expr::Literal(v), Expr::Column(c)) => Some((c, op.commute(), v)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// True when the expression cannot evaluate to TRUE once every column
    /// in `cols` is NULL. Used to turn outer joins into inner joins.
    pub fn is_null_rejecting(&self, cols: &HashSet<ColumnId>) -> bool {
        match self {
            Expr::Column(c) => cols.contains(&c.id),
            Expr::Correlated(_) => false,
            Expr::Literal(v) => matches!(v, Scalar::Null | Scalar::Bool(false)),
            Expr::BinaryOp { op, left, right } => match op {
                BinOp::And => left.is_null_rejecting(cols) || right.is_null_rejecting(cols),
                BinOp::Or => left.is_null_rejecting(cols) && right.is_null_rejecting(cols),
                _ => left.is_null_rejecting(cols) || right.is_null_rejecting(cols),
            },
            Expr::UnaryOp { op, arg } => match op {
                UnaryOp::IsNotNull => arg.is_null_rejecting(cols),
                UnaryOp::IsNull | UnaryOp::Not => false,
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Correlated(c) => write!(f, "outer({})", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { op, left, right } => write!(f, "{}({}, {})", op.symbol(), left, right),
            Expr::UnaryOp { op, arg } => match op {
                UnaryOp::Not => write!(f, "not({})", arg),
                UnaryOp::IsNull => write!(f, "isnull({})", arg),
                UnaryOp::IsNotNull => write!(f, "not(isnull({}))", arg),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

impl SortItem {
    pub fn new(expr: Expr, desc: bool) -> Self {
        Self { expr, desc }
    }
}

impl fmt::Display for SortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.desc {
            write!(f, "{} desc", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    FirstRow,
}

impl AggFunc {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "firstrow" | "first_row" | "any_value" => Some(AggFunc::FirstRow),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::FirstRow => "firstrow",
        }
    }

    /// Function that merges partial results of `self`, if it splits.
    pub fn final_func(self) -> Option<AggFunc> {
        match self {
            AggFunc::Count | AggFunc::Sum => Some(AggFunc::Sum),
            AggFunc::Min => Some(AggFunc::Min),
            AggFunc::Max => Some(AggFunc::Max),
            AggFunc::FirstRow => Some(AggFunc::FirstRow),
            AggFunc::Avg => None,
        }
    }

    /// True when the function yields NULL over an empty input.
    pub fn null_on_empty(self) -> bool {
        !matches!(self, AggFunc::Count)
    }
}

/// Execution mode of an aggregate call; split aggregations run a Partial
/// phase close to the data and a Final phase above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AggMode {
    #[default]
    Complete,
    Partial,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    /// Empty for `count(*)`.
    pub args: Vec<Expr>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub mode: AggMode,
}

impl AggCall {
    pub fn new(func: AggFunc, args: Vec<Expr>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            mode: AggMode::Complete,
        }
    }

    pub fn first_row(col: ColumnRef) -> Self {
        Self::new(AggFunc::FirstRow, vec![Expr::Column(col)])
    }

    pub fn column_ids(&self) -> HashSet<ColumnId> {
        self.args.iter().flat_map(|a| a.column_ids()).collect()
    }

    pub fn is_decomposable(&self) -> bool {
        !self.distinct && self.func.final_func().is_some()
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        let args = if args.is_empty() {
            "*".to_string()
        } else {
            args.join(", ")
        };
        let distinct = if self.distinct { "distinct " } else { "" };
        match self.mode {
            AggMode::Complete => write!(f, "{}({}{})", self.func.name(), distinct, args),
            AggMode::Partial => write!(f, "partial_{}({}{})", self.func.name(), distinct, args),
            AggMode::Final => write!(f, "final_{}({}{})", self.func.name(), distinct, args),
        }
    }
}
