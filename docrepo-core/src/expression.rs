//! The provider-independent query expression tree.
//!
//! Expressions are produced upstream by the request pipeline and describe filters,
//! sorting, pagination, sparse fieldsets and includes for a single resource type.
//! The tree is a closed set of variants; every consumer walks it through
//! [`QueryExpressionVisitor`], whose provided [`visit_expression`] dispatcher matches
//! exhaustively so that adding a variant forces every visitor to be updated.
//!
//! [`visit_expression`]: QueryExpressionVisitor::visit_expression

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use bson::Bson;

use crate::{
    constraint::QueryableHandlerExpression,
    resource::{AttrAttribute, ResourceField},
};

/// A path of one or more fields, such as `caption` or `author.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldChain(Vec<ResourceField>);

impl FieldChain {
    /// Creates a chain from its segments. Returns `None` for an empty path.
    pub fn new(fields: Vec<ResourceField>) -> Option<Self> {
        if fields.is_empty() {
            None
        } else {
            Some(FieldChain(fields))
        }
    }

    /// Creates a single-segment chain.
    pub fn single(field: impl Into<ResourceField>) -> Self {
        FieldChain(vec![field.into()])
    }

    pub fn fields(&self) -> &[ResourceField] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the attribute this chain refers to if it is exactly one attribute segment.
    pub fn as_single_attribute(&self) -> Option<&AttrAttribute> {
        match self.0.as_slice() {
            [ResourceField::Attribute(attr)] => Some(attr),
            _ => None,
        }
    }
}

impl fmt::Display for FieldChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, field) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(field.public_name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Equals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl ComparisonOperator {
    /// The operator that gives the same result when the operands are swapped.
    pub fn mirrored(self) -> Self {
        match self {
            ComparisonOperator::Equals => ComparisonOperator::Equals,
            ComparisonOperator::GreaterThan => ComparisonOperator::LessThan,
            ComparisonOperator::GreaterOrEqual => ComparisonOperator::LessOrEqual,
            ComparisonOperator::LessThan => ComparisonOperator::GreaterThan,
            ComparisonOperator::LessOrEqual => ComparisonOperator::GreaterOrEqual,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "equals",
            ComparisonOperator::GreaterThan => "greaterThan",
            ComparisonOperator::GreaterOrEqual => "greaterOrEqual",
            ComparisonOperator::LessThan => "lessThan",
            ComparisonOperator::LessOrEqual => "lessOrEqual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextMatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

/// `operator(left, right)`.
#[derive(Debug, Clone)]
pub struct ComparisonExpression {
    pub operator: ComparisonOperator,
    pub left: Box<QueryExpression>,
    pub right: Box<QueryExpression>,
}

#[derive(Debug, Clone)]
pub struct LogicalExpression {
    pub operator: LogicalOperator,
    pub terms: Vec<QueryExpression>,
}

/// Set membership: the target equals any of the constants.
#[derive(Debug, Clone)]
pub struct AnyExpression {
    pub target: FieldChain,
    pub constants: Vec<Bson>,
}

#[derive(Debug, Clone)]
pub struct MatchTextExpression {
    pub target: FieldChain,
    pub kind: TextMatchKind,
    pub text: String,
}

/// Number of resources in a to-many relationship.
#[derive(Debug, Clone)]
pub struct CountExpression {
    pub target: FieldChain,
}

#[derive(Debug, Clone)]
pub enum SortTarget {
    Field(FieldChain),
    Count(CountExpression),
}

#[derive(Debug, Clone)]
pub struct SortElement {
    pub target: SortTarget,
    pub ascending: bool,
}

impl SortElement {
    pub fn ascending(target: FieldChain) -> Self {
        SortElement { target: SortTarget::Field(target), ascending: true }
    }

    pub fn descending(target: FieldChain) -> Self {
        SortElement { target: SortTarget::Field(target), ascending: false }
    }
}

/// Ordered list of sort keys; earlier elements take precedence.
#[derive(Debug, Clone, Default)]
pub struct SortExpression {
    pub elements: Vec<SortElement>,
}

impl SortExpression {
    pub fn new(elements: impl IntoIterator<Item = SortElement>) -> Self {
        SortExpression { elements: elements.into_iter().collect() }
    }
}

/// A page of results. Page numbers start at 1; a missing page size means "everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationExpression {
    page_number: usize,
    page_size: Option<usize>,
}

impl PaginationExpression {
    pub fn new(page_number: usize, page_size: Option<usize>) -> Self {
        PaginationExpression {
            page_number: page_number.max(1),
            page_size,
        }
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Number of documents skipped before this page.
    pub fn offset(&self) -> usize {
        self.page_size
            .map(|size| (self.page_number - 1).saturating_mul(size))
            .unwrap_or(0)
    }

    pub fn limit(&self) -> Option<usize> {
        self.page_size
    }
}

/// The fields requested for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseFieldSet {
    fields: BTreeSet<ResourceField>,
}

impl SparseFieldSet {
    pub fn new(fields: impl IntoIterator<Item = ResourceField>) -> Self {
        SparseFieldSet { fields: fields.into_iter().collect() }
    }

    pub fn contains_relationship(&self) -> bool {
        self.fields
            .iter()
            .any(ResourceField::is_relationship)
    }

    /// Names of the requested relationships.
    pub fn relationship_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|field| field.is_relationship())
            .map(ResourceField::public_name)
    }

    /// The requested attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &AttrAttribute> {
        self.fields
            .iter()
            .filter_map(ResourceField::as_attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Sparse fieldsets keyed by resource type public name.
#[derive(Debug, Clone, Default)]
pub struct SparseFieldTableExpression {
    pub table: BTreeMap<String, SparseFieldSet>,
}

/// Relationship paths whose resources should be returned alongside the primary data.
#[derive(Debug, Clone, Default)]
pub struct IncludeExpression {
    pub chains: Vec<FieldChain>,
}

/// A node in the query expression tree.
#[derive(Debug, Clone)]
pub enum QueryExpression {
    ResourceFieldChain(FieldChain),
    Literal(Bson),
    Null,
    Comparison(ComparisonExpression),
    Logical(LogicalExpression),
    Not(Box<QueryExpression>),
    Any(AnyExpression),
    MatchText(MatchTextExpression),
    Count(CountExpression),
    Sort(SortExpression),
    Pagination(PaginationExpression),
    SparseFieldTable(SparseFieldTableExpression),
    Include(IncludeExpression),
    QueryableHandler(QueryableHandlerExpression),
}

impl QueryExpression {
    pub fn field(chain: FieldChain) -> Self {
        QueryExpression::ResourceFieldChain(chain)
    }

    pub fn literal(value: impl Into<Bson>) -> Self {
        QueryExpression::Literal(value.into())
    }

    pub fn compare(operator: ComparisonOperator, left: QueryExpression, right: QueryExpression) -> Self {
        QueryExpression::Comparison(ComparisonExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `equals(chain, value)`.
    pub fn equals(chain: FieldChain, value: impl Into<Bson>) -> Self {
        Self::compare(
            ComparisonOperator::Equals,
            QueryExpression::field(chain),
            QueryExpression::literal(value),
        )
    }

    pub fn and(terms: impl IntoIterator<Item = QueryExpression>) -> Self {
        QueryExpression::Logical(LogicalExpression {
            operator: LogicalOperator::And,
            terms: terms.into_iter().collect(),
        })
    }

    pub fn or(terms: impl IntoIterator<Item = QueryExpression>) -> Self {
        QueryExpression::Logical(LogicalExpression {
            operator: LogicalOperator::Or,
            terms: terms.into_iter().collect(),
        })
    }

    pub fn not(expression: QueryExpression) -> Self {
        QueryExpression::Not(Box::new(expression))
    }

    pub fn any(target: FieldChain, constants: impl IntoIterator<Item = Bson>) -> Self {
        QueryExpression::Any(AnyExpression {
            target,
            constants: constants.into_iter().collect(),
        })
    }

    pub fn match_text(target: FieldChain, kind: TextMatchKind, text: impl Into<String>) -> Self {
        QueryExpression::MatchText(MatchTextExpression { target, kind, text: text.into() })
    }

    pub fn has(target: FieldChain) -> Self {
        QueryExpression::Count(CountExpression { target })
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpression::ResourceFieldChain(chain) => write!(f, "{chain}"),
            QueryExpression::Literal(value) => write_constant(f, value),
            QueryExpression::Null => f.write_str("null"),
            QueryExpression::Comparison(comparison) => write!(
                f,
                "{}({},{})",
                comparison.operator.keyword(),
                comparison.left,
                comparison.right
            ),
            QueryExpression::Logical(logical) => {
                let keyword = match logical.operator {
                    LogicalOperator::And => "and",
                    LogicalOperator::Or => "or",
                };
                write!(f, "{keyword}(")?;
                for (index, term) in logical.terms.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
            QueryExpression::Not(inner) => write!(f, "not({inner})"),
            QueryExpression::Any(any) => {
                write!(f, "any({}", any.target)?;
                for constant in &any.constants {
                    f.write_str(",")?;
                    write_constant(f, constant)?;
                }
                f.write_str(")")
            }
            QueryExpression::MatchText(text) => {
                let keyword = match text.kind {
                    TextMatchKind::Contains => "contains",
                    TextMatchKind::StartsWith => "startsWith",
                    TextMatchKind::EndsWith => "endsWith",
                };
                write!(f, "{keyword}({},'{}')", text.target, text.text)
            }
            QueryExpression::Count(count) => write!(f, "count({})", count.target),
            QueryExpression::Sort(sort) => {
                for (index, element) in sort.elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    if !element.ascending {
                        f.write_str("-")?;
                    }
                    match &element.target {
                        SortTarget::Field(chain) => write!(f, "{chain}")?,
                        SortTarget::Count(count) => write!(f, "count({})", count.target)?,
                    }
                }
                Ok(())
            }
            QueryExpression::Pagination(page) => match page.page_size {
                Some(size) => write!(f, "page {} (size {size})", page.page_number),
                None => write!(f, "page {}", page.page_number),
            },
            QueryExpression::SparseFieldTable(table) => {
                write!(f, "fields[")?;
                for (index, name) in table.table.keys().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(name)?;
                }
                f.write_str("]")
            }
            QueryExpression::Include(include) => {
                f.write_str("include(")?;
                for (index, chain) in include.chains.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{chain}")?;
                }
                f.write_str(")")
            }
            QueryExpression::QueryableHandler(_) => f.write_str("handler"),
        }
    }
}

fn write_constant(f: &mut fmt::Formatter<'_>, value: &Bson) -> fmt::Result {
    match value {
        Bson::String(text) => write!(f, "'{text}'"),
        other => write!(f, "'{other}'"),
    }
}

/// Walks a [`QueryExpression`] tree.
///
/// Implementors provide one method per node variant and use
/// [`visit_expression`](Self::visit_expression) to dispatch into children.
pub trait QueryExpressionVisitor {
    type Output;
    type Error;

    fn visit_field_chain(&mut self, chain: &FieldChain) -> Result<Self::Output, Self::Error>;
    fn visit_literal(&mut self, value: &Bson) -> Result<Self::Output, Self::Error>;
    fn visit_null(&mut self) -> Result<Self::Output, Self::Error>;
    fn visit_comparison(
        &mut self,
        expr: &ComparisonExpression,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_logical(&mut self, expr: &LogicalExpression) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &QueryExpression) -> Result<Self::Output, Self::Error>;
    fn visit_any(&mut self, expr: &AnyExpression) -> Result<Self::Output, Self::Error>;
    fn visit_match_text(
        &mut self,
        expr: &MatchTextExpression,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_count(&mut self, expr: &CountExpression) -> Result<Self::Output, Self::Error>;
    fn visit_sort(&mut self, expr: &SortExpression) -> Result<Self::Output, Self::Error>;
    fn visit_pagination(
        &mut self,
        expr: &PaginationExpression,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_sparse_field_table(
        &mut self,
        expr: &SparseFieldTableExpression,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_include(&mut self, expr: &IncludeExpression) -> Result<Self::Output, Self::Error>;
    fn visit_queryable_handler(
        &mut self,
        expr: &QueryableHandlerExpression,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expression(&mut self, expr: &QueryExpression) -> Result<Self::Output, Self::Error> {
        match expr {
            QueryExpression::ResourceFieldChain(chain) => self.visit_field_chain(chain),
            QueryExpression::Literal(value) => self.visit_literal(value),
            QueryExpression::Null => self.visit_null(),
            QueryExpression::Comparison(comparison) => self.visit_comparison(comparison),
            QueryExpression::Logical(logical) => self.visit_logical(logical),
            QueryExpression::Not(inner) => self.visit_not(inner),
            QueryExpression::Any(any) => self.visit_any(any),
            QueryExpression::MatchText(text) => self.visit_match_text(text),
            QueryExpression::Count(count) => self.visit_count(count),
            QueryExpression::Sort(sort) => self.visit_sort(sort),
            QueryExpression::Pagination(page) => self.visit_pagination(page),
            QueryExpression::SparseFieldTable(table) => self.visit_sparse_field_table(table),
            QueryExpression::Include(include) => self.visit_include(include),
            QueryExpression::QueryableHandler(handler) => self.visit_queryable_handler(handler),
        }
    }
}
