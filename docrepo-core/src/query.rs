//! The provider query: what a [`StoreBackend`](crate::backend::StoreBackend) executes.
//!
//! A provider query is the backend-facing result of translating a validated
//! [`QueryLayer`](crate::layer::QueryLayer). Field names in a provider query are stored
//! document field names (the identity lives under [`IDENTITY_FIELD`](crate::resource::IDENTITY_FIELD)).
//!
//! ```ignore
//! use docrepo::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("caption", "Two").and(Filter::gt("pages", 100)))
//!     .sort("caption", SortDirection::Asc)
//!     .sort("_id", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! Backends translate filters with a [`QueryVisitor`].

use bson::Bson;

use crate::error::DocumentStoreError;

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (nulls first, then by type rank and value).
    Asc,
    /// Descending order.
    Desc,
}

/// One sort key of a provider query.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// Stored document field name.
    pub field: String,
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. A missing field equals `null`.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String contains a substring, or array contains a value.
    Contains,
    /// Negation of [`Contains`](FieldOp::Contains).
    NotContains,
    /// String starts with the given text, case-sensitive.
    StartsWith,
    /// String ends with the given text, case-sensitive.
    EndsWith,
    /// Field equals any of the values of the given array.
    AnyOf,
    /// Field equals none of the values of the given array.
    NoneOf,
}

/// A filter expression over stored document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// All sub-expressions must match.
    And(Vec<Expr>),
    /// At least one sub-expression must match.
    Or(Vec<Expr>),
    /// The sub-expression must not match.
    Not(Box<Expr>),
    /// `Exists(field, true)` matches documents with a non-null value for `field`.
    Exists(String, bool),
    /// Compares a stored field against a constant.
    Field {
        field: String,
        op: FieldOp,
        value: Bson,
    },
}

impl Expr {
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Combines with `other` using logical AND, flattening nested ANDs.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut terms) => {
                terms.push(other);
                Expr::And(terms)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines with `other` using logical OR, flattening nested ORs.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut terms) => {
                terms.push(other);
                Expr::Or(terms)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// A structured query for retrieving documents from one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Expr>,
    /// Sort keys in precedence order.
    pub sort: Vec<Sort>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Stored field names to return. `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// ANDs `expr` into the existing filter.
    pub fn and_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }
}

/// Shorthands for common filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lte, value)
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Expr {
        Expr::field(field, FieldOp::StartsWith, value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Expr {
        Expr::field(field, FieldOp::EndsWith, value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Contains, value)
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::NotContains, value)
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

    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Expr {
        Expr::field(field, FieldOp::AnyOf, Bson::Array(values.into_iter().collect()))
    }

    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Expr {
        Expr::field(field, FieldOp::NoneOf, Bson::Array(values.into_iter().collect()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Keys added earlier take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query
            .sort
            .push(Sort { field: field.into(), direction });
        self
    }

    pub fn projection(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.query.projection = Some(
            fields
                .into_iter()
                .map(Into::into)
                .collect(),
        );
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Translates a filter [`Expr`] into a backend representation.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

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
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
