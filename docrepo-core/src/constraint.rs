//! Query constraints contributed by the surrounding framework.
//!
//! Besides the caller-supplied [`QueryLayer`](crate::layer::QueryLayer), the request
//! pipeline may contribute additional expressions through [`QueryConstraintProvider`]s.
//! The repository only looks at unscoped entries and uses two kinds of them:
//! sparse-field tables, to re-check that no relationship is projected, and
//! [`QueryableHandlerExpression`]s, which mutate the provider query directly.

use std::{fmt, sync::Arc};

use crate::{
    expression::{FieldChain, QueryExpression},
    query::Query,
};

/// An expression together with the relationship path it applies to.
///
/// `scope == None` means the expression applies to the primary resource type.
#[derive(Debug, Clone)]
pub struct ExpressionInScope {
    pub scope: Option<FieldChain>,
    pub expression: QueryExpression,
}

impl ExpressionInScope {
    pub fn unscoped(expression: QueryExpression) -> Self {
        ExpressionInScope { scope: None, expression }
    }

    pub fn scoped(scope: FieldChain, expression: QueryExpression) -> Self {
        ExpressionInScope { scope: Some(scope), expression }
    }
}

/// Source of extra query constraints for the current request.
pub trait QueryConstraintProvider: Send + Sync {
    fn get_constraints(&self) -> Vec<ExpressionInScope>;
}

/// A fixed list of constraints.
impl QueryConstraintProvider for Vec<ExpressionInScope> {
    fn get_constraints(&self) -> Vec<ExpressionInScope> {
        self.clone()
    }
}

type QueryHandler = dyn Fn(Query) -> Query + Send + Sync;

/// Wraps a function that rewrites the provider query before it is built.
#[derive(Clone)]
pub struct QueryableHandlerExpression {
    handler: Arc<QueryHandler>,
}

impl QueryableHandlerExpression {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        QueryableHandlerExpression { handler: Arc::new(handler) }
    }

    pub fn apply(&self, query: Query) -> Query {
        (self.handler)(query)
    }
}

impl fmt::Debug for QueryableHandlerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryableHandlerExpression")
            .finish_non_exhaustive()
    }
}
