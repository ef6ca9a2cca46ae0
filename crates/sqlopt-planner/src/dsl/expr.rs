//! SQL-like expression strings: `b > 5 AND t.c IS NOT NULL`,
//! `sum(b) AS total`, `a DESC`.
//!
//! Parsing produces an unresolved [`Ast`]; [`Scope::resolve`] binds names
//! to column ids. Names not found in the innermost schema are looked up in
//! enclosing scopes and become correlated references.

use std::fmt;

use sqlopt_core::expr::{AggCall, AggFunc, BinOp, ColumnRef, Expr, UnaryOp};
use sqlopt_core::id::ColumnId;
use sqlopt_core::schema::{DataType, Field, Schema};
use sqlopt_core::types::Scalar;

use super::DslError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Sym(&'static str),
}

const SYMBOLS: [&str; 16] = [
    "<=", ">=", "<>", "!=", "==", "=", "<", ">", "+", "-", "*", "/", "(", ")", ",", ".",
];

fn tokenize(src: &str) -> Result<Vec<Token>, DslError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let token = if text.contains('.') {
                text.parse().map(Token::Float).ok()
            } else {
                text.parse().map(Token::Int).ok()
            };
            tokens.push(token.ok_or_else(|| DslError::expr(src, format!("bad number {}", text)))?);
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '\'' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            if i == chars.len() {
                return Err(DslError::expr(src, "unterminated string"));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let sym = SYMBOLS
                .iter()
                .find(|s| rest.starts_with(**s))
                .ok_or_else(|| DslError::expr(src, format!("unexpected character '{}'", c)))?;
            tokens.push(Token::Sym(sym));
            i += sym.len();
        }
    }
    Ok(tokens)
}

/// Unresolved expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Ident {
        qualifier: Option<String>,
        name: String,
    },
    Lit(Scalar),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Unary(UnaryOp, Box<Ast>),
    /// Aggregate call; no arguments means `*`.
    Call {
        name: String,
        distinct: bool,
        args: Vec<Ast>,
    },
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ast::Ident {
                qualifier: Some(q),
                name,
            } => write!(f, "{}.{}", q, name),
            Ast::Ident { name, .. } => write!(f, "{}", name),
            Ast::Lit(v) => write!(f, "{}", v),
            Ast::Binary(op, l, r) => write!(f, "{} {} {}", l, op.symbol(), r),
            Ast::Unary(UnaryOp::Not, a) => write!(f, "NOT {}", a),
            Ast::Unary(UnaryOp::IsNull, a) => write!(f, "{} IS NULL", a),
            Ast::Unary(UnaryOp::IsNotNull, a) => write!(f, "{} IS NOT NULL", a),
            Ast::Call { name, distinct, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                let args = if args.is_empty() { "*".to_string() } else { args.join(", ") };
                write!(f, "{}({}{})", name, if *distinct { "distinct " } else { "" }, args)
            }
        }
    }
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Result<Self, DslError> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn err(&self, msg: impl Into<String>) -> DslError {
        DslError::expr(self.src, msg)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), DslError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", sym)))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expr(&mut self) -> Result<Ast, DslError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            left = Ast::Binary(BinOp::Or, Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Ast, DslError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            left = Ast::Binary(BinOp::And, Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Ast, DslError> {
        if self.eat_keyword("not") {
            return Ok(Ast::Unary(UnaryOp::Not, Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Ast, DslError> {
        let left = self.additive()?;
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(self.err("expected NULL after IS"));
            }
            let op = if negated { UnaryOp::IsNotNull } else { UnaryOp::IsNull };
            return Ok(Ast::Unary(op, Box::new(left)));
        }
        if let Some(Token::Sym(s)) = self.peek() {
            if let Ok(op) = BinOp::parse(s) {
                if op.is_comparison() {
                    self.pos += 1;
                    return Ok(Ast::Binary(op, Box::new(left), Box::new(self.additive()?)));
                }
            }
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Ast, DslError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_sym("+") {
                BinOp::Add
            } else if self.eat_sym("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            left = Ast::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
    }

    fn multiplicative(&mut self) -> Result<Ast, DslError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_sym("*") {
                BinOp::Mul
            } else if self.eat_sym("/") {
                BinOp::Div
            } else {
                return Ok(left);
            };
            left = Ast::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Ast, DslError> {
        if self.eat_sym("-") {
            return Ok(match self.unary()? {
                Ast::Lit(Scalar::I64(v)) => Ast::Lit(Scalar::I64(-v)),
                Ast::Lit(Scalar::F64(v)) => Ast::Lit(Scalar::F64(-v)),
                other => Ast::Binary(BinOp::Sub, Box::new(Ast::Lit(Scalar::I64(0))), Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast, DslError> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Ast::Lit(Scalar::I64(v))),
            Some(Token::Float(v)) => Ok(Ast::Lit(Scalar::F64(v))),
            Some(Token::Str(s)) => Ok(Ast::Lit(Scalar::Str(s))),
            Some(Token::Sym("(")) => {
                let inner = self.expr()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Ast::Lit(Scalar::Bool(true))),
                "false" => Ok(Ast::Lit(Scalar::Bool(false))),
                "null" => Ok(Ast::Lit(Scalar::Null)),
                _ if self.eat_sym("(") => self.call(word),
                _ if self.eat_sym(".") => match self.next() {
                    Some(Token::Ident(name)) => Ok(Ast::Ident {
                        qualifier: Some(word),
                        name,
                    }),
                    _ => Err(self.err("expected column name after '.'")),
                },
                _ => Ok(Ast::Ident {
                    qualifier: None,
                    name: word,
                }),
            },
            Some(t) => Err(self.err(format!("unexpected token {:?}", t))),
            None => Err(self.err("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: String) -> Result<Ast, DslError> {
        if self.eat_sym("*") {
            self.expect_sym(")")?;
            return Ok(Ast::Call {
                name,
                distinct: false,
                args: Vec::new(),
            });
        }
        let distinct = self.eat_keyword("distinct");
        let mut args = vec![self.expr()?];
        while self.eat_sym(",") {
            args.push(self.expr()?);
        }
        self.expect_sym(")")?;
        Ok(Ast::Call { name, distinct, args })
    }

    fn finish(&self) -> Result<(), DslError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.err(format!("trailing input at {:?}", self.tokens[self.pos])))
        }
    }
}

/// Parse a whole expression.
pub fn parse(src: &str) -> Result<Ast, DslError> {
    let mut p = Parser::new(src)?;
    let ast = p.expr()?;
    p.finish()?;
    Ok(ast)
}

/// `expr [AS name]`.
pub fn parse_aliased(src: &str) -> Result<(Ast, Option<String>), DslError> {
    let mut p = Parser::new(src)?;
    let ast = p.expr()?;
    let alias = if p.eat_keyword("as") {
        match p.next() {
            Some(Token::Ident(name)) => Some(name),
            _ => return Err(p.err("expected a name after AS")),
        }
    } else {
        None
    };
    p.finish()?;
    Ok((ast, alias))
}

/// `expr [ASC|DESC]`; the flag is true for descending.
pub fn parse_sort_item(src: &str) -> Result<(Ast, bool), DslError> {
    let mut p = Parser::new(src)?;
    let ast = p.expr()?;
    let desc = if p.eat_keyword("desc") {
        true
    } else {
        p.eat_keyword("asc");
        false
    };
    p.finish()?;
    Ok((ast, desc))
}

/// Name lookup context; the innermost schema is last.
#[derive(Debug, Default, Clone)]
pub struct Scope<'a> {
    schemas: Vec<&'a Schema>,
}

impl<'a> Scope<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schemas: vec![schema] }
    }

    /// Scope for a subquery: `self` becomes the enclosing scope.
    pub fn nested(&self, schema: &'a Schema) -> Self {
        let mut schemas = self.schemas.clone();
        schemas.push(schema);
        Self { schemas }
    }

    /// Columns of the current schema named `name` (and `qualifier`, if any).
    fn lookup(schema: &Schema, qualifier: Option<&str>, name: &str) -> Result<Option<Field>, DslError> {
        let mut hits = schema.fields.iter().filter(|f| {
            f.name.eq_ignore_ascii_case(name)
                && qualifier.map_or(true, |q| f.qualifier.as_deref().is_some_and(|fq| fq.eq_ignore_ascii_case(q)))
        });
        let first = hits.next().cloned();
        if hits.next().is_some() {
            let full = qualifier.map(|q| format!("{}.{}", q, name)).unwrap_or_else(|| name.to_string());
            return Err(DslError::AmbiguousColumn(full));
        }
        Ok(first)
    }

    /// Resolve a column name; `true` when it comes from an enclosing scope.
    pub fn column(&self, qualifier: Option<&str>, name: &str) -> Result<(Field, bool), DslError> {
        for (depth, schema) in self.schemas.iter().rev().enumerate() {
            if let Some(f) = Self::lookup(schema, qualifier, name)? {
                return Ok((f, depth > 0));
            }
        }
        let full = qualifier.map(|q| format!("{}.{}", q, name)).unwrap_or_else(|| name.to_string());
        Err(DslError::UnknownColumn(full))
    }

    fn field(&self, id: ColumnId) -> Option<&Field> {
        self.schemas.iter().rev().find_map(|s| s.field_by_id(id))
    }

    pub fn resolve(&self, ast: &Ast) -> Result<Expr, DslError> {
        match ast {
            Ast::Ident { qualifier, name } => {
                let (field, outer) = self.column(qualifier.as_deref(), name)?;
                let col = field.column_ref();
                Ok(if outer { Expr::Correlated(col) } else { Expr::Column(col) })
            }
            Ast::Lit(v) => Ok(Expr::Literal(v.clone())),
            Ast::Binary(op, l, r) => Ok(Expr::binary(*op, self.resolve(l)?, self.resolve(r)?)),
            Ast::Unary(op, a) => Ok(Expr::unary(*op, self.resolve(a)?)),
            Ast::Call { .. } => Err(DslError::expr(&ast.to_string(), "aggregate call outside an aggregation")),
        }
    }

    /// Resolve an aggregate call such as `count(*)` or `sum(distinct b)`.
    pub fn resolve_agg(&self, ast: &Ast) -> Result<AggCall, DslError> {
        let Ast::Call { name, distinct, args } = ast else {
            return Err(DslError::expr(&ast.to_string(), "expected an aggregate call"));
        };
        let func = AggFunc::parse(name)
            .ok_or_else(|| DslError::expr(&ast.to_string(), format!("unknown aggregate '{}'", name)))?;
        if args.is_empty() && func != AggFunc::Count {
            return Err(DslError::expr(&ast.to_string(), "only count accepts '*'"));
        }
        let args = args.iter().map(|a| self.resolve(a)).collect::<Result<_, _>>()?;
        Ok(AggCall {
            distinct: *distinct,
            ..AggCall::new(func, args)
        })
    }

    /// Output type and nullability of `expr`.
    pub fn type_of(&self, expr: &Expr) -> (DataType, bool) {
        match expr {
            Expr::Column(c) | Expr::Correlated(c) => self.col_type(c),
            Expr::Literal(v) => scalar_type(v),
            Expr::BinaryOp { op, left, right } => {
                let (lt, ln) = self.type_of(left);
                let (rt, rn) = self.type_of(right);
                let nullable = ln || rn;
                if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
                    (DataType::Boolean, nullable)
                } else if *op == BinOp::Div || lt == DataType::Float64 || rt == DataType::Float64 {
                    (DataType::Float64, nullable)
                } else {
                    (DataType::Int64, nullable)
                }
            }
            Expr::UnaryOp { op: UnaryOp::Not, arg } => (DataType::Boolean, self.type_of(arg).1),
            Expr::UnaryOp { .. } => (DataType::Boolean, false),
        }
    }

    fn col_type(&self, c: &ColumnRef) -> (DataType, bool) {
        self.field(c.id)
            .map(|f| (f.data_type, f.nullable))
            .unwrap_or((DataType::Int64, true))
    }

    /// Output type and nullability of an aggregate call.
    pub fn agg_type(&self, call: &AggCall) -> (DataType, bool) {
        let arg = call.args.first().map(|a| self.type_of(a));
        match call.func {
            AggFunc::Count => (DataType::Int64, false),
            AggFunc::Avg => (DataType::Float64, true),
            AggFunc::Sum => match arg {
                Some((DataType::Float32 | DataType::Float64, _)) => (DataType::Float64, true),
                _ => (DataType::Int64, true),
            },
            AggFunc::Min | AggFunc::Max => (arg.map(|a| a.0).unwrap_or(DataType::Int64), true),
            AggFunc::FirstRow => arg.unwrap_or((DataType::Int64, true)),
        }
    }
}

fn scalar_type(v: &Scalar) -> (DataType, bool) {
    match v {
        Scalar::Null => (DataType::Int64, true),
        Scalar::Bool(_) => (DataType::Boolean, false),
        Scalar::I32(_) => (DataType::Int32, false),
        Scalar::I64(_) => (DataType::Int64, false),
        Scalar::F32(_) => (DataType::Float32, false),
        Scalar::F64(_) => (DataType::Float64, false),
        Scalar::Str(_) => (DataType::Utf8, false),
        Scalar::Bin(_) => (DataType::Binary, false),
    }
}
