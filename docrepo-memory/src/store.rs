//! In-memory storage implementation.
//!
//! Documents live in per-collection maps keyed by their `_id`, behind an async-aware
//! read-write lock. A transaction works on a private snapshot of the whole store and
//! records its writes; committing replays those writes onto the current state and
//! swaps it in, so uncommitted writes are never visible to other sessions.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tracing::debug;

use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteOutcome, downcast_session},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, Query},
    resource::IDENTITY_FIELD,
    session::{SessionHandle, TransactionId},
};

use crate::evaluator::{DocumentEvaluator, project, sort_documents};

type CollectionMap = BTreeMap<String, Document>;
type StoreMap = HashMap<String, CollectionMap>;

const BACKEND_NAME: &str = "in-memory";

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable; clones share the same underlying data. Queries scan
/// every document of a collection. Unsorted results come back in `_id` order.
///
/// ```ignore
/// use docrepo::{backend::StoreBackend, memory::InMemoryStore};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert_document(None, "books", doc! { "_id": "b1", "caption": "One" }).await?;
/// assert_eq!(store.count_documents(None, "books", None).await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Resolves the pending transaction of `session`, if it has one.
    ///
    /// Sessions created by another `InMemoryStore` are rejected.
    fn pending<'s>(
        &self,
        session: Option<&'s mut (dyn SessionHandle + 'static)>,
    ) -> DocumentStoreResult<Option<&'s mut PendingTransaction>> {
        let Some(session) = downcast_session::<InMemorySession>(session, BACKEND_NAME)? else {
            return Ok(None);
        };

        if !Arc::ptr_eq(&session.store, &self.store) {
            return Err(DocumentStoreError::InvalidSession(
                "session belongs to a different in-memory store".to_string(),
            ));
        }

        Ok(session.transaction.as_mut())
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn start_session(&self) -> DocumentStoreResult<Box<dyn SessionHandle>> {
        Ok(Box::new(InMemorySession {
            store: self.store.clone(),
            transaction: None,
        }))
    }

    async fn insert_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        let id = document_id(&document, collection)?;

        match self.pending(session)? {
            Some(transaction) => {
                insert_into(&mut transaction.working, collection, &id, document.clone())?;
                transaction.writes.push(WriteOp::Insert {
                    collection: collection.to_string(),
                    id: id.clone(),
                    document,
                });
            }
            None => {
                let mut store = self.store.write().await;
                insert_into(&mut store, collection, &id, document)?;
            }
        }

        debug!(collection, id = %id, "Inserted document");
        Ok(WriteOutcome::acknowledged(1))
    }

    async fn replace_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        let document = with_identity(document, id);

        let matched = match self.pending(session)? {
            Some(transaction) => {
                let matched = replace_in(&mut transaction.working, collection, id, document.clone());
                if matched > 0 {
                    transaction.writes.push(WriteOp::Replace {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        document,
                    });
                }
                matched
            }
            None => {
                let mut store = self.store.write().await;
                replace_in(&mut store, collection, id, document)
            }
        };

        debug!(collection, id, matched, "Replaced document");
        Ok(WriteOutcome::acknowledged(matched))
    }

    async fn delete_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome> {
        let matched = match self.pending(session)? {
            Some(transaction) => {
                let matched = delete_from(&mut transaction.working, collection, id);
                if matched > 0 {
                    transaction.writes.push(WriteOp::Delete {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                matched
            }
            None => {
                let mut store = self.store.write().await;
                delete_from(&mut store, collection, id)
            }
        };

        debug!(collection, id, matched, "Deleted document");
        Ok(WriteOutcome::acknowledged(matched))
    }

    async fn query_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        let documents = match self.pending(session)? {
            Some(transaction) => execute(transaction.working.get(collection), &query)?,
            None => {
                let store = self.store.read().await;
                execute(store.get(collection), &query)?
            }
        };

        debug!(collection, found = documents.len(), "Queried documents");
        Ok(documents)
    }

    async fn count_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64> {
        let query = Query { filter, ..Query::default() };

        let total = match self.pending(session)? {
            Some(transaction) => count(transaction.working.get(collection), &query)?,
            None => {
                let store = self.store.read().await;
                count(store.get(collection), &query)?
            }
        };

        Ok(total)
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }
}

/// A write recorded by a transaction, replayed on commit.
#[derive(Debug)]
enum WriteOp {
    Insert {
        collection: String,
        id: String,
        document: Document,
    },
    Replace {
        collection: String,
        id: String,
        document: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
}

#[derive(Debug)]
struct PendingTransaction {
    id: TransactionId,
    working: StoreMap,
    writes: Vec<WriteOp>,
}

/// Session of an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemorySession {
    store: Arc<RwLock<StoreMap>>,
    transaction: Option<PendingTransaction>,
}

#[async_trait]
impl SessionHandle for InMemorySession {
    fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction
            .as_ref()
            .map(|transaction| transaction.id)
    }

    async fn start_transaction(&mut self) -> DocumentStoreResult<TransactionId> {
        if self.transaction.is_some() {
            return Err(DocumentStoreError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }

        let id = TransactionId::new();
        let working = StoreMap::clone(&*self.store.read().await);
        self.transaction = Some(PendingTransaction { id, working, writes: Vec::new() });

        Ok(id)
    }

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| DocumentStoreError::Transaction("no transaction in progress".to_string()))?;

        let mut store = self.store.write().await;
        let mut next = StoreMap::clone(&store);

        for write in transaction.writes {
            match write {
                WriteOp::Insert { collection, id, document } => {
                    insert_into(&mut next, &collection, &id, document).map_err(|_| {
                        DocumentStoreError::Transaction(format!(
                            "write conflict: document '{id}' was inserted into '{collection}' by another session"
                        ))
                    })?;
                }
                WriteOp::Replace { collection, id, document } => {
                    replace_in(&mut next, &collection, &id, document);
                }
                WriteOp::Delete { collection, id } => {
                    delete_from(&mut next, &collection, &id);
                }
            }
        }

        *store = next;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        match self.transaction.take() {
            Some(_) => Ok(()),
            None => Err(DocumentStoreError::Transaction(
                "no transaction in progress".to_string(),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn document_id(document: &Document, collection: &str) -> DocumentStoreResult<String> {
    match document.get(IDENTITY_FIELD) {
        Some(Bson::String(id)) => Ok(id.clone()),
        Some(other) => Err(DocumentStoreError::InvalidDocument(format!(
            "document in '{collection}' has a non-string {IDENTITY_FIELD}: {other}"
        ))),
        None => Err(DocumentStoreError::InvalidDocument(format!(
            "document in '{collection}' has no {IDENTITY_FIELD}"
        ))),
    }
}

/// Forces the stored identity to `id`, keeping it the first field.
fn with_identity(document: Document, id: &str) -> Document {
    let mut stored = Document::new();
    stored.insert(IDENTITY_FIELD, id);

    for (key, value) in document {
        if key != IDENTITY_FIELD {
            stored.insert(key, value);
        }
    }

    stored
}

fn insert_into(
    store: &mut StoreMap,
    collection: &str,
    id: &str,
    document: Document,
) -> DocumentStoreResult<()> {
    let documents = store.entry(collection.to_string()).or_default();

    if documents.contains_key(id) {
        return Err(DocumentStoreError::DocumentAlreadyExists(
            id.to_string(),
            collection.to_string(),
        ));
    }

    documents.insert(id.to_string(), document);
    Ok(())
}

fn replace_in(store: &mut StoreMap, collection: &str, id: &str, document: Document) -> u64 {
    match store
        .get_mut(collection)
        .and_then(|documents| documents.get_mut(id))
    {
        Some(stored) => {
            *stored = document;
            1
        }
        None => 0,
    }
}

fn delete_from(store: &mut StoreMap, collection: &str, id: &str) -> u64 {
    store
        .get_mut(collection)
        .and_then(|documents| documents.remove(id))
        .map_or(0, |_| 1)
}

fn matching(documents: &CollectionMap, filter: Option<&Expr>) -> DocumentStoreResult<Vec<Document>> {
    match filter {
        Some(filter) => DocumentEvaluator::filter_documents(documents.values(), filter),
        None => Ok(documents.values().cloned().collect()),
    }
}

fn execute(documents: Option<&CollectionMap>, query: &Query) -> DocumentStoreResult<Vec<Document>> {
    let Some(documents) = documents else {
        return Ok(Vec::new());
    };

    let mut matched = matching(documents, query.filter.as_ref())?;
    sort_documents(&mut matched, &query.sort);

    Ok(matched
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|document| match &query.projection {
            Some(fields) => project(document, fields),
            None => document,
        })
        .collect())
}

fn count(documents: Option<&CollectionMap>, query: &Query) -> DocumentStoreResult<u64> {
    match documents {
        Some(documents) => Ok(matching(documents, query.filter.as_ref())?.len() as u64),
        None => Ok(0),
    }
}

/// Builder for [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docrepo_core::query::{Filter, SortDirection};

    use super::*;

    fn book(id: &str, caption: &str) -> Document {
        doc! { "_id": id, "caption": caption }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_identity() {
        let store = InMemoryStore::new();
        store
            .insert_document(None, "books", book("b1", "One"))
            .await
            .expect("first insert");

        let err = store
            .insert_document(None, "books", book("b1", "Again"))
            .await
            .expect_err("duplicate");

        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(ref id, ref coll) if id == "b1" && coll == "books"));
    }

    #[tokio::test]
    async fn insert_requires_string_identity() {
        let store = InMemoryStore::new();

        let err = store
            .insert_document(None, "books", doc! { "_id": 1, "caption": "One" })
            .await
            .expect_err("numeric id");
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

        let err = store
            .insert_document(None, "books", doc! { "caption": "One" })
            .await
            .expect_err("missing id");
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn replace_and_delete_report_matched_counts() {
        let store = InMemoryStore::new();
        store
            .insert_document(None, "books", book("b1", "One"))
            .await
            .expect("insert");

        let replaced = store
            .replace_document(None, "books", "b1", doc! { "caption": "Uno" })
            .await
            .expect("replace");
        assert_eq!(replaced, WriteOutcome::acknowledged(1));

        let missing = store
            .replace_document(None, "books", "b9", book("b9", "Nine"))
            .await
            .expect("replace missing");
        assert_eq!(missing.matched_count, 0);

        let stored = store
            .query_documents(None, "books", Query::new())
            .await
            .expect("query");
        assert_eq!(stored, vec![book("b1", "Uno")]);

        assert_eq!(
            store
                .delete_document(None, "books", "b1")
                .await
                .expect("delete")
                .matched_count,
            1
        );
        assert_eq!(
            store
                .delete_document(None, "books", "b1")
                .await
                .expect("delete again")
                .matched_count,
            0
        );
    }

    #[tokio::test]
    async fn query_filters_sorts_pages_and_projects() {
        let store = InMemoryStore::new();
        for (id, caption, pages) in [("b1", "One", 10), ("b2", "Two", 30), ("b3", "Two", 20), ("b4", "Three", 5)] {
            store
                .insert_document(None, "books", doc! { "_id": id, "caption": caption, "pages": pages })
                .await
                .expect("insert");
        }

        let query = Query::builder()
            .filter(Filter::starts_with("caption", "T"))
            .sort("caption", SortDirection::Desc)
            .sort("pages", SortDirection::Asc)
            .offset(1)
            .limit(2)
            .projection(["_id"])
            .build();

        let found = store
            .query_documents(None, "books", query)
            .await
            .expect("query");

        assert_eq!(found, vec![doc! { "_id": "b2" }, doc! { "_id": "b4" }]);
        assert_eq!(
            store
                .count_documents(None, "books", Some(Filter::eq("caption", "Two")))
                .await
                .expect("count"),
            2
        );
        assert_eq!(
            store
                .count_documents(None, "missing", None)
                .await
                .expect("count missing"),
            0
        );
    }

    #[tokio::test]
    async fn transaction_writes_are_isolated_until_commit() {
        let store = InMemoryStore::new();
        let mut session = store.start_session().await.expect("session");
        let transaction_id = session.start_transaction().await.expect("transaction");
        assert_eq!(session.transaction_id(), Some(transaction_id));

        store
            .insert_document(Some(session.as_mut()), "books", book("b1", "One"))
            .await
            .expect("insert");

        let inside = store
            .count_documents(Some(session.as_mut()), "books", None)
            .await
            .expect("count inside");
        let outside = store
            .count_documents(None, "books", None)
            .await
            .expect("count outside");
        assert_eq!((inside, outside), (1, 0));

        session.commit_transaction().await.expect("commit");

        assert!(!session.is_in_transaction());
        assert_eq!(
            store
                .count_documents(None, "books", None)
                .await
                .expect("count after commit"),
            1
        );
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_store_untouched() {
        let store = InMemoryStore::new();
        store
            .insert_document(None, "books", book("b1", "One"))
            .await
            .expect("insert");

        let mut session = store.start_session().await.expect("session");
        session.start_transaction().await.expect("transaction");
        store
            .delete_document(Some(session.as_mut()), "books", "b1")
            .await
            .expect("delete");
        session.abort_transaction().await.expect("abort");

        assert_eq!(
            store
                .count_documents(None, "books", None)
                .await
                .expect("count"),
            1
        );
        assert!(session.abort_transaction().await.is_err());
    }

    #[tokio::test]
    async fn conflicting_insert_fails_the_commit() {
        let store = InMemoryStore::new();
        let mut session = store.start_session().await.expect("session");
        session.start_transaction().await.expect("transaction");

        store
            .insert_document(Some(session.as_mut()), "books", book("b1", "Mine"))
            .await
            .expect("insert in transaction");
        store
            .insert_document(None, "books", book("b1", "Theirs"))
            .await
            .expect("insert outside");

        let err = session.commit_transaction().await.expect_err("conflict");
        assert!(matches!(err, DocumentStoreError::Transaction(_)));
        assert!(!session.is_in_transaction());

        let stored = store
            .query_documents(None, "books", Query::new())
            .await
            .expect("query");
        assert_eq!(stored, vec![book("b1", "Theirs")]);
    }

    #[tokio::test]
    async fn sessions_of_other_stores_are_rejected() {
        let store = InMemoryStore::new();
        let other = InMemoryStore::new();
        let mut session = other.start_session().await.expect("session");

        let err = store
            .query_documents(Some(session.as_mut()), "books", Query::new())
            .await
            .expect_err("foreign session");
        assert!(matches!(err, DocumentStoreError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn collections_can_be_listed_and_dropped() {
        let store = InMemoryStoreBuilder.build().await.expect("build");
        store.create_collection("people").await.expect("create");
        store
            .insert_document(None, "books", book("b1", "One"))
            .await
            .expect("insert");

        assert_eq!(
            store.list_collections().await.expect("list"),
            vec!["books".to_string(), "people".to_string()]
        );

        store.drop_collection("people").await.expect("drop");
        assert!(matches!(
            store.drop_collection("people").await,
            Err(DocumentStoreError::CollectionNotFound(_))
        ));
    }
}
