use std::{any::Any, fmt};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{Acknowledgment, ClientOptions, CollectionOptions, WriteConcern},
};
use tracing::debug;

use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteOutcome, downcast_session},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, Query},
    resource::IDENTITY_FIELD,
    session::{SessionHandle, TransactionId},
};

use crate::{query::MongoQueryTranslator, sanitizer::KeySanitizer};

const BACKEND_NAME: &str = "mongodb";
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB backend. Transactions need a replica set or sharded cluster.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    write_concern: Option<WriteConcern>,
}

impl MongoDbStore {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
            write_concern: None,
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// Sends writes with `w: 0`. Writes then report themselves as unacknowledged and
    /// deletes can no longer be confirmed.
    pub fn with_unacknowledged_writes(mut self) -> Self {
        let mut concern = WriteConcern::default();
        concern.w = Some(Acknowledgment::Nodes(0));
        self.write_concern = Some(concern);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn acknowledges_writes(&self) -> bool {
        !self
            .write_concern
            .as_ref()
            .is_some_and(|concern| matches!(concern.w, Some(Acknowledgment::Nodes(0))))
    }

    fn collection(&self, name: &str) -> MongoCollection<Document> {
        let database = self.client.database(&self.database);
        let name = KeySanitizer::sanitize_key(name);

        match &self.write_concern {
            Some(concern) => database.collection_with_options(
                &name,
                CollectionOptions::builder()
                    .write_concern(concern.clone())
                    .build(),
            ),
            None => database.collection(&name),
        }
    }

    fn outcome(&self, matched_count: u64) -> WriteOutcome {
        match self.acknowledges_writes() {
            true => WriteOutcome::acknowledged(matched_count),
            false => WriteOutcome::unacknowledged(),
        }
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn start_session(&self) -> DocumentStoreResult<Box<dyn SessionHandle>> {
        let session = self
            .client
            .start_session()
            .await
            .map_err(backend_error)?;

        Ok(Box::new(MongoDbSession { session, transaction: None }))
    }

    async fn insert_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        let id = match document.get(IDENTITY_FIELD) {
            Some(Bson::String(id)) => id.clone(),
            _ => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "document in '{collection}' needs a string {IDENTITY_FIELD}"
                )));
            }
        };

        let target = self.collection(collection);
        let document = KeySanitizer::sanitize_document(document);

        let result = match downcast_session::<MongoDbSession>(session, BACKEND_NAME)? {
            Some(session) => {
                target
                    .insert_one(document)
                    .session(&mut session.session)
                    .await
            }
            None => target.insert_one(document).await,
        };
        result.map_err(|err| insert_error(err, &id, collection))?;

        debug!(collection, id = %id, "Inserted document");
        Ok(self.outcome(1))
    }

    async fn replace_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
        mut document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        document.remove(IDENTITY_FIELD);

        let target = self.collection(collection);
        let replacement = KeySanitizer::sanitize_document(document);

        let result = match downcast_session::<MongoDbSession>(session, BACKEND_NAME)? {
            Some(session) => {
                target
                    .replace_one(doc! { IDENTITY_FIELD: id }, replacement)
                    .session(&mut session.session)
                    .await
            }
            None => {
                target
                    .replace_one(doc! { IDENTITY_FIELD: id }, replacement)
                    .await
            }
        };
        let result = result.map_err(backend_error)?;

        debug!(collection, id, matched = result.matched_count, "Replaced document");
        Ok(self.outcome(result.matched_count))
    }

    async fn delete_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome> {
        let target = self.collection(collection);

        let result = match downcast_session::<MongoDbSession>(session, BACKEND_NAME)? {
            Some(session) => {
                target
                    .delete_one(doc! { IDENTITY_FIELD: id })
                    .session(&mut session.session)
                    .await
            }
            None => target.delete_one(doc! { IDENTITY_FIELD: id }).await,
        };
        let result = result.map_err(backend_error)?;

        debug!(collection, id, deleted = result.deleted_count, "Deleted document");
        Ok(self.outcome(result.deleted_count))
    }

    async fn query_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        let target = self.collection(collection);
        let filter = MongoQueryTranslator::filter(query.filter.as_ref())?;
        let Some(options) = MongoQueryTranslator::find_options(&query) else {
            debug!(collection, "Skipped query for an empty page");
            return Ok(Vec::new());
        };

        let documents = match downcast_session::<MongoDbSession>(session, BACKEND_NAME)? {
            Some(session) => {
                let mut cursor = target
                    .find(filter)
                    .with_options(options)
                    .session(&mut session.session)
                    .await
                    .map_err(backend_error)?;

                cursor
                    .stream(&mut session.session)
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(backend_error)?
            }
            None => target
                .find(filter)
                .with_options(options)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?,
        };

        debug!(collection, found = documents.len(), "Queried documents");
        Ok(documents
            .into_iter()
            .map(KeySanitizer::restore_document)
            .collect())
    }

    async fn count_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64> {
        let target = self.collection(collection);
        let filter = MongoQueryTranslator::filter(filter.as_ref())?;

        let count = match downcast_session::<MongoDbSession>(session, BACKEND_NAME)? {
            Some(session) => {
                target
                    .count_documents(filter)
                    .session(&mut session.session)
                    .await
            }
            None => target.count_documents(filter).await,
        };

        count.map_err(backend_error)
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .create_collection(KeySanitizer::sanitize_key(name))
            .await
            .map_err(backend_error)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.collection(name)
            .drop()
            .await
            .map_err(backend_error)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?
            .iter()
            .map(|name| KeySanitizer::restore_key(name))
            .collect())
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Session of a [`MongoDbStore`], wrapping a driver session.
pub struct MongoDbSession {
    session: ClientSession,
    transaction: Option<TransactionId>,
}

impl fmt::Debug for MongoDbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoDbSession")
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionHandle for MongoDbSession {
    fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction
    }

    async fn start_transaction(&mut self) -> DocumentStoreResult<TransactionId> {
        if self.transaction.is_some() {
            return Err(DocumentStoreError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }

        self.session
            .start_transaction()
            .await
            .map_err(transaction_error)?;

        let id = TransactionId::new();
        self.transaction = Some(id);
        Ok(id)
    }

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        self.transaction
            .take()
            .ok_or_else(|| DocumentStoreError::Transaction("no transaction in progress".to_string()))?;

        self.session
            .commit_transaction()
            .await
            .map_err(transaction_error)
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        self.transaction
            .take()
            .ok_or_else(|| DocumentStoreError::Transaction("no transaction in progress".to_string()))?;

        self.session
            .abort_transaction()
            .await
            .map_err(transaction_error)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn backend_error(err: MongoError) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

fn transaction_error(err: MongoError) -> DocumentStoreError {
    DocumentStoreError::Transaction(err.to_string())
}

fn insert_error(err: MongoError, id: &str, collection: &str) -> DocumentStoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => failure.code == DUPLICATE_KEY,
        ErrorKind::Command(failure) => failure.code == DUPLICATE_KEY,
        _ => false,
    };

    match duplicate {
        true => DocumentStoreError::DocumentAlreadyExists(id.to_string(), collection.to_string()),
        false => backend_error(err),
    }
}

/// Builder for [`MongoDbStore`].
#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    acknowledged_writes: bool,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            acknowledged_writes: true,
        }
    }

    /// Whether writes wait for the server's acknowledgement. Defaults to `true`.
    pub fn acknowledged_writes(mut self, acknowledged: bool) -> Self {
        self.acknowledged_writes = acknowledged;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        debug!(database = %self.database, "Connected MongoDB client");

        let store = MongoDbStore::new(client, self.database);
        Ok(match self.acknowledged_writes {
            true => store,
            false => store.with_unacknowledged_writes(),
        })
    }
}
