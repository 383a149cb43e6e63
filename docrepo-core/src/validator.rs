//! Rejects query layers a document store cannot execute.
//!
//! A document store has no joins, so a query may only reference attributes of the
//! primary resource type. The validator fails fast, before any store call, when a
//! layer includes or projects a relationship, filters or sorts through one, uses a
//! multi-segment field chain, or compares two attributes against each other.

use crate::{
    constraint::QueryableHandlerExpression,
    error::{RepositoryError, RepositoryResult},
    expression::{
        AnyExpression, ComparisonExpression, CountExpression, FieldChain, IncludeExpression,
        LogicalExpression, MatchTextExpression, PaginationExpression, QueryExpression,
        QueryExpressionVisitor, SortExpression, SortTarget, SparseFieldSet,
        SparseFieldTableExpression,
    },
    layer::QueryLayer,
};

/// Validates [`QueryLayer`]s against what a document store supports.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExpressionValidator;

impl QueryExpressionValidator {
    pub fn new() -> Self {
        QueryExpressionValidator
    }

    /// Checks the whole layer. Absent filter, sort or pagination parts are skipped.
    pub fn validate(&self, layer: &QueryLayer) -> RepositoryResult<()> {
        if let Some(chain) = layer.include().first() {
            return Err(include_not_supported(chain));
        }

        for (resource_type, fields) in layer.projection() {
            ensure_no_relationship_in_projection(resource_type, fields)?;
        }

        let mut visitor = ValidatingVisitor;

        if let Some(filter) = layer.filter() {
            visitor.visit_expression(filter)?;
        }

        if let Some(sort) = layer.sort() {
            visitor.visit_sort(sort)?;
        }

        if let Some(pagination) = layer.pagination() {
            visitor.visit_pagination(pagination)?;
        }

        Ok(())
    }

    /// Checks a single expression, e.g. a filter contributed outside of a layer.
    pub fn validate_expression(&self, expression: &QueryExpression) -> RepositoryResult<()> {
        ValidatingVisitor.visit_expression(expression)
    }
}

/// Fails if a sparse fieldset selects a relationship.
pub(crate) fn ensure_no_relationship_in_projection(
    resource_type: &str,
    fields: &SparseFieldSet,
) -> RepositoryResult<()> {
    match fields.relationship_names().next() {
        Some(name) => Err(RepositoryError::unsupported_relationship(format!(
            "relationship '{name}' of resource type '{resource_type}' cannot be selected in a sparse fieldset"
        ))),
        None => Ok(()),
    }
}

fn include_not_supported(chain: &FieldChain) -> RepositoryError {
    RepositoryError::unsupported_relationship(format!(
        "related resources cannot be included ('{chain}')"
    ))
}

struct ValidatingVisitor;

impl QueryExpressionVisitor for ValidatingVisitor {
    type Output = ();
    type Error = RepositoryError;

    fn visit_field_chain(&mut self, chain: &FieldChain) -> RepositoryResult<()> {
        if chain.len() > 1 || chain.fields()[0].is_relationship() {
            return Err(RepositoryError::unsupported_relationship(format!(
                "'{chain}' does not refer to an attribute of the primary resource type"
            )));
        }
        Ok(())
    }

    fn visit_literal(&mut self, _value: &bson::Bson) -> RepositoryResult<()> {
        Ok(())
    }

    fn visit_null(&mut self) -> RepositoryResult<()> {
        Ok(())
    }

    fn visit_comparison(&mut self, expr: &ComparisonExpression) -> RepositoryResult<()> {
        if matches!(
            (expr.left.as_ref(), expr.right.as_ref()),
            (QueryExpression::ResourceFieldChain(_), QueryExpression::ResourceFieldChain(_))
        ) {
            return Err(RepositoryError::AttributeComparisonNotSupported(
                QueryExpression::Comparison(expr.clone()).to_string(),
            ));
        }

        self.visit_expression(&expr.left)?;
        self.visit_expression(&expr.right)
    }

    fn visit_logical(&mut self, expr: &LogicalExpression) -> RepositoryResult<()> {
        expr.terms
            .iter()
            .try_for_each(|term| self.visit_expression(term))
    }

    fn visit_not(&mut self, expr: &QueryExpression) -> RepositoryResult<()> {
        self.visit_expression(expr)
    }

    fn visit_any(&mut self, expr: &AnyExpression) -> RepositoryResult<()> {
        self.visit_field_chain(&expr.target)
    }

    fn visit_match_text(&mut self, expr: &MatchTextExpression) -> RepositoryResult<()> {
        self.visit_field_chain(&expr.target)
    }

    fn visit_count(&mut self, expr: &CountExpression) -> RepositoryResult<()> {
        self.visit_field_chain(&expr.target)
    }

    fn visit_sort(&mut self, expr: &SortExpression) -> RepositoryResult<()> {
        expr.elements
            .iter()
            .try_for_each(|element| match &element.target {
                SortTarget::Field(chain) => self.visit_field_chain(chain),
                SortTarget::Count(count) => self.visit_count(count),
            })
    }

    fn visit_pagination(&mut self, _expr: &PaginationExpression) -> RepositoryResult<()> {
        Ok(())
    }

    fn visit_sparse_field_table(
        &mut self,
        expr: &SparseFieldTableExpression,
    ) -> RepositoryResult<()> {
        expr.table
            .iter()
            .try_for_each(|(resource_type, fields)| {
                ensure_no_relationship_in_projection(resource_type, fields)
            })
    }

    fn visit_include(&mut self, expr: &IncludeExpression) -> RepositoryResult<()> {
        match expr.chains.first() {
            Some(chain) => Err(include_not_supported(chain)),
            None => Ok(()),
        }
    }

    fn visit_queryable_handler(
        &mut self,
        _expr: &QueryableHandlerExpression,
    ) -> RepositoryResult<()> {
        Ok(())
    }
}
