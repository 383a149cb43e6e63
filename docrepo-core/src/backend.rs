//! Storage backend abstraction.
//!
//! A [`StoreBackend`] stores BSON documents in named collections and executes provider
//! [`Query`]s against them. Every data operation takes an optional session handle: when
//! one is passed, the operation runs inside that session (and its transaction, if one is
//! active); otherwise it runs on its own with per-document atomicity.
//!
//! Session handles are created by the backend itself through
//! [`start_session`](StoreBackend::start_session). A backend receiving a handle it did
//! not create fails with [`DocumentStoreError::InvalidSession`](crate::error::DocumentStoreError::InvalidSession).
//!
//! ```ignore
//! use docrepo::{backend::StoreBackend, memory::InMemoryStore};
//! use bson::doc;
//!
//! let backend = InMemoryStore::new();
//! let mut session = backend.start_session().await?;
//! session.start_transaction().await?;
//!
//! backend
//!     .insert_document(Some(session.as_mut()), "books", doc! { "_id": "b1", "caption": "One" })
//!     .await?;
//! session.commit_transaction().await?;
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use bson::Document;

use crate::{
    error::DocumentStoreResult,
    query::{Expr, Query},
    session::SessionHandle,
};

/// Result of a write as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// `false` when the store was told not to acknowledge writes.
    pub acknowledged: bool,
    /// Number of documents the write matched.
    pub matched_count: u64,
}

impl WriteOutcome {
    pub fn acknowledged(matched_count: u64) -> Self {
        WriteOutcome { acknowledged: true, matched_count }
    }

    pub fn unacknowledged() -> Self {
        WriteOutcome { acknowledged: false, matched_count: 0 }
    }
}

/// Abstract interface for document storage backends.
///
/// Implementations must be safe to share between tasks. A single session handle is
/// never used by two operations at once; callers sequence operations on a session.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Starts a new session. The session has no transaction until
    /// [`SessionHandle::start_transaction`] is called.
    async fn start_session(&self) -> DocumentStoreResult<Box<dyn SessionHandle>>;

    /// Inserts a document. Fails with `DocumentAlreadyExists` if a document with the
    /// same `_id` is already stored. The collection is created when missing.
    async fn insert_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome>;

    /// Replaces the document stored under `id`. Matching nothing is not an error;
    /// the outcome reports a `matched_count` of zero.
    async fn replace_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome>;

    /// Deletes the document stored under `id`.
    async fn delete_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome>;

    /// Executes a provider query. A missing collection yields no documents.
    async fn query_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`, or all documents without one.
    async fn count_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64>;

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Releases the resources held by the backend.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn start_session(&self) -> DocumentStoreResult<Box<dyn SessionHandle>> {
        (*self).start_session().await
    }

    async fn insert_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        (*self)
            .insert_document(session, collection, document)
            .await
    }

    async fn replace_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        (*self)
            .replace_document(session, collection, id, document)
            .await
    }

    async fn delete_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome> {
        (*self)
            .delete_document(session, collection, id)
            .await
    }

    async fn query_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .query_documents(session, collection, query)
            .await
    }

    async fn count_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64> {
        (*self)
            .count_documents(session, collection, filter)
            .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (*self).list_collections().await
    }
}

/// Factory for backends that need asynchronous setup, such as connecting to a server.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

/// Downcasts a session handle to the backend's own session type.
///
/// Backends call this at the start of every session-aware operation.
pub fn downcast_session<'a, S>(
    session: Option<&'a mut (dyn SessionHandle + 'static)>,
    backend: &str,
) -> DocumentStoreResult<Option<&'a mut S>>
where
    S: SessionHandle + 'static,
{
    match session {
        None => Ok(None),
        Some(handle) => handle
            .as_any_mut()
            .downcast_mut::<S>()
            .map(Some)
            .ok_or_else(|| {
                crate::error::DocumentStoreError::InvalidSession(format!(
                    "session was not created by the {backend} backend"
                ))
            }),
    }
}
