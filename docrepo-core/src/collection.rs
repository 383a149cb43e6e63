//! Session-aware access to one collection.
//!
//! A [`Collection`] binds a collection name to a backend. Every operation takes the
//! request's [`SessionHolder`]; when a session is attached the operation runs in it,
//! so all operations of a unit of work observe the same transaction.
//!
//! ```ignore
//! let books = store.collection("books");
//! let mut session = SessionHolder::new();
//!
//! books.insert(&mut session, doc! { "_id": "b1", "caption": "One" }).await?;
//! let found = books.find(&mut session, Query::builder().filter(Filter::eq("_id", "b1")).build()).await?;
//! ```

use bson::Document;

use crate::{
    backend::{StoreBackend, WriteOutcome},
    error::DocumentStoreResult,
    query::{Expr, Query},
    session::SessionHolder,
};

#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
}

impl<B: StoreBackend> Clone for Collection<'_, B> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), backend: self.backend }
    }
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: impl Into<String>, backend: &'a B) -> Self {
        Self { name: name.into(), backend }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub async fn insert(
        &self,
        session: &mut SessionHolder,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.backend
            .insert_document(session.handle_mut(), &self.name, document)
            .await
    }

    /// Replaces the document stored under `id`.
    pub async fn replace(
        &self,
        session: &mut SessionHolder,
        id: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.backend
            .replace_document(session.handle_mut(), &self.name, id, document)
            .await
    }

    pub async fn delete(
        &self,
        session: &mut SessionHolder,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.backend
            .delete_document(session.handle_mut(), &self.name, id)
            .await
    }

    pub async fn find(
        &self,
        session: &mut SessionHolder,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.backend
            .query_documents(session.handle_mut(), &self.name, query)
            .await
    }

    pub async fn count(
        &self,
        session: &mut SessionHolder,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64> {
        self.backend
            .count_documents(session.handle_mut(), &self.name, filter)
            .await
    }
}
