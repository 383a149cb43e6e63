//! The document store: entry point for repositories, collections and transactions.
//!
//! ```ignore
//! use docrepo::prelude::*;
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let books = store.repository::<Book>()?;
//!
//! let mut session = SessionHolder::new();
//! let transaction_id = store.begin_transaction(&mut session).await?;
//! // ... repository calls with `&mut session` ...
//! session.commit().await?;
//! ```

use tracing::debug;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    error::{DocumentStoreResult, RepositoryError, RepositoryResult},
    repository::DocumentRepository,
    resource::Resource,
    session::{SessionHolder, TransactionId},
};

#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns a repository for `R`, stored in the collection named after its resource type.
    pub fn repository<R: Resource>(&self) -> RepositoryResult<DocumentRepository<'_, B, R>> {
        DocumentRepository::new(&self.backend)
    }

    pub fn collection(&self, name: &str) -> Collection<'_, B> {
        Collection::new(name, &self.backend)
    }

    /// Starts a session with a transaction and attaches it to `holder`.
    ///
    /// Fails if `holder` already has a session attached.
    pub async fn begin_transaction(
        &self,
        holder: &mut SessionHolder,
    ) -> RepositoryResult<TransactionId> {
        if holder.has_session() {
            return Err(RepositoryError::Transaction(
                "a session is already attached to this holder".to_string(),
            ));
        }

        let mut session = self.backend.start_session().await?;
        let transaction_id = session.start_transaction().await?;
        holder.attach(session)?;

        debug!(%transaction_id, "Started transaction");
        Ok(transaction_id)
    }

    /// Starts a session without a transaction and attaches it to `holder`.
    pub async fn begin_session(&self, holder: &mut SessionHolder) -> RepositoryResult<()> {
        let session = self.backend.start_session().await?;
        holder.attach(session)
    }

    pub async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend
            .create_collection(name)
            .await
    }

    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_collection(name).await
    }

    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
