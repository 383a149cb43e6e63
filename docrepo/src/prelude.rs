//! Commonly used types, traits and the `Resource` derive.
//!
//! ```ignore
//! use docrepo::prelude::*;
//! ```

pub use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteOutcome},
    cancel::CancellationToken,
    constraint::{ExpressionInScope, QueryConstraintProvider, QueryableHandlerExpression},
    error::{DocumentStoreError, DocumentStoreResult, RepositoryError, RepositoryResult},
    expression::{
        ComparisonOperator, FieldChain, LogicalOperator, PaginationExpression, QueryExpression,
        SortElement, SortExpression, SparseFieldSet, TextMatchKind,
    },
    hooks::{ResourceWriteHooks, WriteOperationKind},
    layer::QueryLayer,
    mapping::ResourceExt,
    query::{Expr, FieldOp, Filter, Query, SortDirection},
    repository::DocumentRepository,
    resource::{
        AttrAttribute, RelationshipAttribute, RelationshipKind, Resource, ResourceField, ResourceGraph,
        ResourceType, TargetedFields, ValueKind,
    },
    session::{SessionHolder, TransactionId},
    store::DocumentStore,
    validator::QueryExpressionValidator,
};
pub use docrepo_macros::Resource;
