//! The resource repository over a document store.
//!
//! [`DocumentRepository`] is the only component that touches the store for a given
//! resource type. Reads are validated against what a document store can execute
//! before any store call is made; writes run inside the [`ErrorTranslator`]
//! boundary so that a failed write inside a transaction aborts and clears it.
//!
//! ```ignore
//! let store = DocumentStore::new(InMemoryStore::new());
//! let books = store.repository::<Book>()?;
//! let mut session = SessionHolder::new();
//! let cancel = CancellationToken::new();
//!
//! store.begin_transaction(&mut session).await?;
//!
//! let mut book = books.prepare_for_create("b1", &cancel).await?;
//! books
//!     .create(&mut session, &TargetedFields::all_attributes(books.resource_type()), &request, &mut book, &cancel)
//!     .await?;
//!
//! session.commit().await?;
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    builder::{DocumentQueryableBuilder, QueryableBuilder},
    cancel::CancellationToken,
    collection::Collection,
    constraint::QueryConstraintProvider,
    error::{RepositoryError, RepositoryResult},
    expression::{PaginationExpression, QueryExpression},
    hooks::{NoopWriteHooks, ResourceWriteHooks, WriteOperationKind},
    layer::QueryLayer,
    mapping::ResourceExt,
    query::Query,
    resource::{RelationshipAttribute, Resource, ResourceType, TargetedFields, ValueKind},
    session::SessionHolder,
    translate::ErrorTranslator,
    validator::{QueryExpressionValidator, ensure_no_relationship_in_projection},
};

/// Reads and writes resources of type `R` in the collection named after its resource type.
pub struct DocumentRepository<'a, B: StoreBackend, R: Resource> {
    collection: Collection<'a, B>,
    resource_type: Arc<ResourceType>,
    validator: QueryExpressionValidator,
    queryable_builder: Arc<dyn QueryableBuilder>,
    constraint_providers: Vec<Arc<dyn QueryConstraintProvider>>,
    hooks: Arc<dyn ResourceWriteHooks<R>>,
    _resource: PhantomData<fn() -> R>,
}

impl<'a, B: StoreBackend, R: Resource> DocumentRepository<'a, B, R> {
    /// Creates a repository over `backend`.
    ///
    /// Fails with [`RepositoryError::InvalidConfiguration`] unless the identity of `R`
    /// is a string.
    pub fn new(backend: &'a B) -> RepositoryResult<Self> {
        let resource_type = R::resource_type();

        if resource_type.identity().kind() != ValueKind::String {
            return Err(RepositoryError::InvalidConfiguration(format!(
                "resource type '{}' cannot be stored: document repositories can only be used with resources that have an identity of type string",
                resource_type.public_name()
            )));
        }

        Ok(Self {
            collection: Collection::new(resource_type.public_name(), backend),
            resource_type: Arc::new(resource_type),
            validator: QueryExpressionValidator::new(),
            queryable_builder: Arc::new(DocumentQueryableBuilder),
            constraint_providers: Vec::new(),
            hooks: Arc::new(NoopWriteHooks),
            _resource: PhantomData,
        })
    }

    /// Replaces the builder that turns query layers into provider queries.
    pub fn with_queryable_builder(mut self, builder: Arc<dyn QueryableBuilder>) -> Self {
        self.queryable_builder = builder;
        self
    }

    pub fn with_constraint_provider(mut self, provider: Arc<dyn QueryConstraintProvider>) -> Self {
        self.constraint_providers.push(provider);
        self
    }

    pub fn with_write_hooks(mut self, hooks: Arc<dyn ResourceWriteHooks<R>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    pub fn collection(&self) -> &Collection<'a, B> {
        &self.collection
    }

    /// Returns the resources matching `layer`, in the requested order and page.
    pub async fn get(
        &self,
        session: &mut SessionHolder,
        layer: &QueryLayer,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<R>> {
        debug!(
            resource_type = self.resource_type.public_name(),
            transaction_id = ?session.transaction_id(),
            "Getting resources"
        );

        let query = self.build_query(layer)?;
        let documents = cancel
            .run_until_cancelled(self.collection.find(session, query))
            .await
            .ok_or(RepositoryError::Cancelled)??;

        documents
            .into_iter()
            .map(|document| R::from_document(document).map_err(RepositoryError::from))
            .collect()
    }

    /// Counts the resources matching `filter`.
    pub async fn count(
        &self,
        session: &mut SessionHolder,
        filter: Option<&QueryExpression>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        debug!(
            resource_type = self.resource_type.public_name(),
            transaction_id = ?session.transaction_id(),
            "Counting resources"
        );

        let mut layer = QueryLayer::new(self.resource_type.clone());
        if let Some(filter) = filter {
            layer = layer.with_filter(filter.clone());
        }

        let query = self.build_query(&layer)?;
        let count = cancel
            .run_until_cancelled(self.collection.count(session, query.filter))
            .await
            .ok_or(RepositoryError::Cancelled)??;

        Ok(count)
    }

    /// Returns a new resource with only its identity set. Does not touch the store.
    pub async fn prepare_for_create(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<R> {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        Ok(R::with_identity(id)?)
    }

    /// Copies the targeted attributes of `request` onto `target` and inserts it.
    pub async fn create(
        &self,
        session: &mut SessionHolder,
        targeted: &TargetedFields,
        request: &R,
        target: &mut R,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        debug!(
            resource_type = self.resource_type.public_name(),
            transaction_id = ?session.transaction_id(),
            "Creating resource"
        );

        ensure_no_targeted_relationships(targeted)?;
        target.assign_attributes(request, targeted.attributes())?;

        self.hooks
            .on_writing(target, WriteOperationKind::CreateResource, cancel)
            .await?;

        let document = target.to_document()?;
        let outcome = cancel
            .run_until_cancelled(self.collection.insert(session, document))
            .await
            .ok_or(RepositoryError::Cancelled)?;
        ErrorTranslator::translate(session, outcome).await?;

        self.hooks
            .on_write_succeeded(target, WriteOperationKind::CreateResource, cancel)
            .await
    }

    /// Returns the first resource matching `layer`, if any.
    pub async fn prepare_for_update(
        &self,
        session: &mut SessionHolder,
        layer: &QueryLayer,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<R>> {
        let layer = match layer.pagination() {
            Some(_) => layer.clone(),
            None => layer
                .clone()
                .with_pagination(PaginationExpression::new(1, Some(1))),
        };

        Ok(self
            .get(session, &layer, cancel)
            .await?
            .into_iter()
            .next())
    }

    /// Copies the targeted attributes of `request` onto `target` and replaces the
    /// stored document with the same identity.
    pub async fn update(
        &self,
        session: &mut SessionHolder,
        targeted: &TargetedFields,
        request: &R,
        target: &mut R,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        debug!(
            resource_type = self.resource_type.public_name(),
            transaction_id = ?session.transaction_id(),
            "Updating resource"
        );

        ensure_no_targeted_relationships(targeted)?;
        target.assign_attributes(request, targeted.attributes())?;

        self.hooks
            .on_writing(target, WriteOperationKind::UpdateResource, cancel)
            .await?;

        let id = target.identity_value()?;
        let document = target.to_document()?;
        let outcome = cancel
            .run_until_cancelled(self.collection.replace(session, &id, document))
            .await
            .ok_or(RepositoryError::Cancelled)?;
        let outcome = ErrorTranslator::translate(session, outcome).await?;

        if outcome.matched_count == 0 {
            warn!(
                resource_type = self.resource_type.public_name(),
                id = %id,
                "Update did not match a stored document"
            );
        }

        self.hooks
            .on_write_succeeded(target, WriteOperationKind::UpdateResource, cancel)
            .await
    }

    /// Deletes the resource stored under `id`.
    ///
    /// `existing` is the already loaded resource, when the caller has it; otherwise a
    /// placeholder carrying only the identity is handed to the hooks.
    pub async fn delete(
        &self,
        session: &mut SessionHolder,
        existing: Option<R>,
        id: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        debug!(
            resource_type = self.resource_type.public_name(),
            transaction_id = ?session.transaction_id(),
            id = %id,
            "Deleting resource"
        );

        let mut resource = match existing {
            Some(resource) => resource,
            None => R::with_identity(id)?,
        };

        self.hooks
            .on_writing(&mut resource, WriteOperationKind::DeleteResource, cancel)
            .await?;

        let outcome = cancel
            .run_until_cancelled(self.collection.delete(session, id))
            .await
            .ok_or(RepositoryError::Cancelled)?;
        let outcome = ErrorTranslator::translate(session, outcome).await?;
        ErrorTranslator::ensure_deleted(id, outcome)?;

        self.hooks
            .on_write_succeeded(&resource, WriteOperationKind::DeleteResource, cancel)
            .await
    }

    /// Relationships are not stored by this repository.
    pub async fn set_relationship(
        &self,
        _left: &mut R,
        relationship: &RelationshipAttribute,
        _right_ids: &[String],
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        Err(relationship_not_writable(relationship))
    }

    /// Relationships are not stored by this repository.
    pub async fn add_to_to_many_relationship(
        &self,
        _left_id: &str,
        relationship: &RelationshipAttribute,
        _right_ids: &[String],
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        Err(relationship_not_writable(relationship))
    }

    /// Relationships are not stored by this repository.
    pub async fn remove_from_to_many_relationship(
        &self,
        _left: &mut R,
        relationship: &RelationshipAttribute,
        _right_ids: &[String],
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        Err(relationship_not_writable(relationship))
    }

    /// Validates `layer`, applies the contributed constraints and builds the provider query.
    fn build_query(&self, layer: &QueryLayer) -> RepositoryResult<Query> {
        self.validator.validate(layer)?;

        let constraints = self
            .constraint_providers
            .iter()
            .flat_map(|provider| provider.get_constraints())
            .filter(|constraint| constraint.scope.is_none())
            .map(|constraint| constraint.expression)
            .collect::<Vec<_>>();

        for expression in &constraints {
            if let QueryExpression::SparseFieldTable(table) = expression {
                for (resource_type, fields) in &table.table {
                    ensure_no_relationship_in_projection(resource_type, fields)?;
                }
            }
        }

        let base = constraints
            .iter()
            .filter_map(|expression| match expression {
                QueryExpression::QueryableHandler(handler) => Some(handler),
                _ => None,
            })
            .fold(Query::new(), |query, handler| handler.apply(query));

        Ok(self
            .queryable_builder
            .build(base, &self.resource_type, layer)?)
    }
}

impl<B: StoreBackend, R: Resource> fmt::Debug for DocumentRepository<'_, B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("collection", &self.collection)
            .field("resource_type", &self.resource_type.public_name())
            .field("constraint_providers", &self.constraint_providers.len())
            .finish_non_exhaustive()
    }
}

fn ensure_no_targeted_relationships(targeted: &TargetedFields) -> RepositoryResult<()> {
    match targeted.relationships().next() {
        Some(relationship) => Err(relationship_not_writable(relationship)),
        None => Ok(()),
    }
}

fn relationship_not_writable(relationship: &RelationshipAttribute) -> RepositoryError {
    RepositoryError::unsupported_relationship(format!(
        "relationship '{}' cannot be written",
        relationship.public_name()
    ))
}
