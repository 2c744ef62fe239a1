//! Query construction and filtering API.
//!
//! A [`Query`] combines an optional engine query string (interpreted by the
//! collection's [`QueryParser`](crate::parser::QueryParser)), structured filter
//! expressions, pagination, sorting and a field list. Collections resolve it into a
//! backend-facing [`SearchRequest`] whose filter is a single [`Expr`] tree.
//!
//! # Query Building
//!
//! ```ignore
//! use triage_odm_core::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .query("howler.status:open AND howler.score:[50 TO *]")
//!     .filter(Filter::eq("howler.analytic", "Sigma"))
//!     .rows(25)
//!     .offset(0)
//!     .sort("timestamp", SortDirection::Desc)
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static constructors:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `wildcard`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`, `all`

use serde_json::Value;

use crate::error::DatastoreError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key on a dotted field path.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// String contains substring, or array contains value.
    Contains,
    StartsWith,
    EndsWith,
    /// Glob match where `*` matches any run and `?` a single character.
    Wildcard,
    /// Field holds any of the given values.
    AnyOf,
    /// Field holds none of the given values.
    NoneOf,
}

/// A filter expression over dotted field paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches every document.
    MatchAll,
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    Field {
        field: String,
        op: FieldOp,
        value: Value,
    },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Value) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    pub fn and(self, other: Expr) -> Self {
        match (self, other) {
            (Expr::MatchAll, other) => other,
            (this, Expr::MatchAll) => this,
            (Expr::And(mut list), other) => {
                list.push(other);
                Expr::And(list)
            }
            (this, other) => Expr::And(vec![this, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Helper struct for constructing filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Wildcard, Value::String(pattern.into()))
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn all() -> Expr {
        Expr::MatchAll
    }

    pub fn any_of(field: impl Into<String>, values: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, values.into())
    }

    pub fn none_of(field: impl Into<String>, values: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, values.into())
    }
}

/// A caller-facing search description.
///
/// `offset` and `rows` default to the collection configuration when unset.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Engine query string, parsed by the collection's query parser.
    pub query: Option<String>,
    /// Structured filters, ANDed with the query string.
    pub filters: Vec<Expr>,
    pub offset: Option<usize>,
    pub rows: Option<usize>,
    pub sort: Vec<Sort>,
    /// Dotted paths to project in raw results. Empty means everything.
    pub field_list: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// A query matching everything.
    pub fn all() -> Self {
        Self::default()
    }
}

impl From<&str> for Query {
    fn from(query: &str) -> Self {
        Query::builder().query(query).build()
    }
}

impl From<String> for Query {
    fn from(query: String) -> Self {
        Query::builder().query(query).build()
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query::builder().filter(filter).build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the engine query string.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query.query = Some(query.into());
        self
    }

    /// Adds a structured filter. Filters are ANDed together.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filters.push(filter);
        self
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.query.rows = Some(rows);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Adds a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn field_list<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.field_list = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// The resolved, backend-facing form of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub filter: Expr,
    pub offset: usize,
    pub rows: usize,
    pub sort: Vec<Sort>,
    pub field_list: Vec<String>,
}

impl SearchRequest {
    /// A request for every match of `filter`, unpaginated and unsorted.
    pub fn unbounded(filter: Expr) -> Self {
        Self { filter, offset: 0, rows: usize::MAX, sort: Vec::new(), field_list: Vec::new() }
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DatastoreError>;

    fn visit_match_all(&mut self) -> Result<Self::Output, Self::Error>;
    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Value,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::MatchAll => self.visit_match_all(),
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
