//! Translates a validated [`QueryLayer`] into a provider [`Query`].

use bson::Bson;

use crate::{
    constraint::QueryableHandlerExpression,
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{
        AnyExpression, ComparisonExpression, ComparisonOperator, CountExpression, FieldChain,
        IncludeExpression, LogicalExpression, LogicalOperator, MatchTextExpression,
        PaginationExpression, QueryExpression, QueryExpressionVisitor, SortExpression,
        SortTarget, SparseFieldTableExpression, TextMatchKind,
    },
    layer::QueryLayer,
    query::{Expr, FieldOp, Query, Sort, SortDirection},
    resource::{IDENTITY_FIELD, ResourceType},
};

/// Applies a query layer to a base provider query.
///
/// The base query may already carry filters or sorting contributed by queryable
/// handlers; implementations add to it rather than replace it.
pub trait QueryableBuilder: Send + Sync {
    fn build(
        &self,
        base: Query,
        resource_type: &ResourceType,
        layer: &QueryLayer,
    ) -> DocumentStoreResult<Query>;
}

/// The default builder, producing queries over stored document field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentQueryableBuilder;

impl QueryableBuilder for DocumentQueryableBuilder {
    fn build(
        &self,
        base: Query,
        resource_type: &ResourceType,
        layer: &QueryLayer,
    ) -> DocumentStoreResult<Query> {
        let mut query = base;

        if let Some(filter) = layer.filter() {
            let expr = FilterTranslator { resource_type }.visit_expression(filter)?;
            query = query.and_filter(expr);
        }

        if let Some(sort) = layer.sort() {
            for element in &sort.elements {
                let chain = match &element.target {
                    SortTarget::Field(chain) => chain,
                    SortTarget::Count(count) => {
                        return Err(unsupported(format!("sorting by count({})", count.target)));
                    }
                };

                query.sort.push(Sort {
                    field: stored_field(resource_type, chain)?,
                    direction: if element.ascending {
                        SortDirection::Asc
                    } else {
                        SortDirection::Desc
                    },
                });
            }
        }

        if let Some(limit) = layer
            .pagination()
            .and_then(PaginationExpression::limit)
        {
            query.limit = Some(limit);
            query.offset = layer
                .pagination()
                .map(PaginationExpression::offset);

            // Pages are only stable under a total order.
            if !query.sort.iter().any(|key| key.field == IDENTITY_FIELD) {
                query.sort.push(Sort {
                    field: IDENTITY_FIELD.to_string(),
                    direction: SortDirection::Asc,
                });
            }
        }

        if let Some(fields) = layer.own_projection() {
            let mut names = fields
                .attributes()
                .map(|attr| resource_type.stored_field_name(attr).to_string())
                .collect::<Vec<_>>();

            if !names.iter().any(|name| name == IDENTITY_FIELD) {
                names.push(IDENTITY_FIELD.to_string());
            }

            query.projection = Some(names);
        }

        Ok(query)
    }
}

fn unsupported(what: impl std::fmt::Display) -> DocumentStoreError {
    DocumentStoreError::InvalidQuery(format!("{what} cannot be translated into a document query"))
}

fn stored_field(resource_type: &ResourceType, chain: &FieldChain) -> DocumentStoreResult<String> {
    chain
        .as_single_attribute()
        .map(|attr| resource_type.stored_field_name(attr).to_string())
        .ok_or_else(|| unsupported(format!("field chain '{chain}'")))
}

fn constant(expr: &QueryExpression) -> Option<Bson> {
    match expr {
        QueryExpression::Literal(value) => Some(value.clone()),
        QueryExpression::Null => Some(Bson::Null),
        _ => None,
    }
}

fn field_op(operator: ComparisonOperator) -> FieldOp {
    match operator {
        ComparisonOperator::Equals => FieldOp::Eq,
        ComparisonOperator::GreaterThan => FieldOp::Gt,
        ComparisonOperator::GreaterOrEqual => FieldOp::Gte,
        ComparisonOperator::LessThan => FieldOp::Lt,
        ComparisonOperator::LessOrEqual => FieldOp::Lte,
    }
}

/// Translates boolean filter nodes. Value nodes on their own are not filters.
struct FilterTranslator<'a> {
    resource_type: &'a ResourceType,
}

impl QueryExpressionVisitor for FilterTranslator<'_> {
    type Output = Expr;
    type Error = DocumentStoreError;

    fn visit_field_chain(&mut self, chain: &FieldChain) -> DocumentStoreResult<Expr> {
        Err(unsupported(format!("a bare field reference '{chain}'")))
    }

    fn visit_literal(&mut self, value: &Bson) -> DocumentStoreResult<Expr> {
        Err(unsupported(format!("a bare constant {value}")))
    }

    fn visit_null(&mut self) -> DocumentStoreResult<Expr> {
        Err(unsupported("a bare null"))
    }

    fn visit_comparison(&mut self, expr: &ComparisonExpression) -> DocumentStoreResult<Expr> {
        let (chain, value, operator) = match (expr.left.as_ref(), expr.right.as_ref()) {
            (QueryExpression::ResourceFieldChain(chain), other) => {
                (chain, constant(other), expr.operator)
            }
            (other, QueryExpression::ResourceFieldChain(chain)) => {
                (chain, constant(other), expr.operator.mirrored())
            }
            _ => return Err(unsupported(QueryExpression::Comparison(expr.clone()))),
        };

        let value =
            value.ok_or_else(|| unsupported(QueryExpression::Comparison(expr.clone())))?;

        if value == Bson::Null && operator != ComparisonOperator::Equals {
            return Err(unsupported(QueryExpression::Comparison(expr.clone())));
        }

        Ok(Expr::field(
            stored_field(self.resource_type, chain)?,
            field_op(operator),
            value,
        ))
    }

    fn visit_logical(&mut self, expr: &LogicalExpression) -> DocumentStoreResult<Expr> {
        let terms = expr
            .terms
            .iter()
            .map(|term| self.visit_expression(term))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(match expr.operator {
            LogicalOperator::And => Expr::And(terms),
            LogicalOperator::Or => Expr::Or(terms),
        })
    }

    fn visit_not(&mut self, expr: &QueryExpression) -> DocumentStoreResult<Expr> {
        Ok(self.visit_expression(expr)?.not())
    }

    fn visit_any(&mut self, expr: &AnyExpression) -> DocumentStoreResult<Expr> {
        Ok(Expr::field(
            stored_field(self.resource_type, &expr.target)?,
            FieldOp::AnyOf,
            Bson::Array(expr.constants.clone()),
        ))
    }

    fn visit_match_text(&mut self, expr: &MatchTextExpression) -> DocumentStoreResult<Expr> {
        let op = match expr.kind {
            TextMatchKind::Contains => FieldOp::Contains,
            TextMatchKind::StartsWith => FieldOp::StartsWith,
            TextMatchKind::EndsWith => FieldOp::EndsWith,
        };

        Ok(Expr::field(
            stored_field(self.resource_type, &expr.target)?,
            op,
            expr.text.clone(),
        ))
    }

    fn visit_count(&mut self, expr: &CountExpression) -> DocumentStoreResult<Expr> {
        Err(unsupported(format!("count({})", expr.target)))
    }

    fn visit_sort(&mut self, _expr: &SortExpression) -> DocumentStoreResult<Expr> {
        Err(unsupported("a sort inside a filter"))
    }

    fn visit_pagination(&mut self, _expr: &PaginationExpression) -> DocumentStoreResult<Expr> {
        Err(unsupported("pagination inside a filter"))
    }

    fn visit_sparse_field_table(
        &mut self,
        _expr: &SparseFieldTableExpression,
    ) -> DocumentStoreResult<Expr> {
        Err(unsupported("a sparse fieldset inside a filter"))
    }

    fn visit_include(&mut self, _expr: &IncludeExpression) -> DocumentStoreResult<Expr> {
        Err(unsupported("an include inside a filter"))
    }

    fn visit_queryable_handler(
        &mut self,
        _expr: &QueryableHandlerExpression,
    ) -> DocumentStoreResult<Expr> {
        Err(unsupported("a queryable handler inside a filter"))
    }
}
