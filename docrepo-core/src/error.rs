//! Error types and result types for document store and repository operations.
//!
//! Two layers of errors exist:
//!
//! - [`DocumentStoreError`] is raised by storage backends and describes what went wrong
//!   at the store level (serialization, missing documents, driver failures, ...).
//! - [`RepositoryError`] is what the resource repository surfaces to the surrounding
//!   framework. Store failures raised by writes are wrapped into
//!   [`RepositoryError::DataStoreUpdate`] by the error translator.

use std::fmt;

use bson::error::Error as BsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// This enum covers serialization errors, document lifecycle issues, collection management,
/// session handling and backend-specific errors.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between resources and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document violates schema constraints or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The query could not be translated for this backend.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A session handle was passed to a backend that did not create it.
    #[error("Invalid session: {0}")]
    InvalidSession(String),
    /// Starting, committing or aborting a transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// A write against the store failed.
///
/// Only the error translator creates this error; it always carries the reason and,
/// when the store itself raised the failure, the original [`DocumentStoreError`]
/// as its source.
#[derive(Debug)]
pub struct DataStoreUpdateError {
    message: String,
    source: Option<DocumentStoreError>,
}

impl DataStoreUpdateError {
    pub(crate) fn new(message: impl Into<String>, source: Option<DocumentStoreError>) -> Self {
        Self { message: message.into(), source }
    }

    /// Returns the human readable reason of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the store failure that caused this error, if any.
    pub fn cause(&self) -> Option<&DocumentStoreError> {
        self.source.as_ref()
    }
}

impl fmt::Display for DataStoreUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DataStoreUpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by [`DocumentRepository`](crate::repository::DocumentRepository).
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The request reads, writes, includes, projects, filters or sorts through a relationship.
    #[error("Relationships are not supported by this document store: {0}")]
    UnsupportedRelationship(String),
    /// A filter compares two attributes of the same document against each other.
    #[error("Comparing attributes against each other is not supported by this document store: {0}")]
    AttributeComparisonNotSupported(String),
    /// The resource type cannot be stored by this repository.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The store rejected a write, or a delete matched nothing or was not acknowledged.
    #[error("Failed to update the data store: {0}")]
    DataStoreUpdate(#[source] DataStoreUpdateError),
    /// The cancellation token fired before the store call completed.
    #[error("Operation was cancelled")]
    Cancelled,
    /// A session or transaction was used in a state that does not permit the operation.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// A store failure outside of a write boundary (reads, mapping).
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
}

impl RepositoryError {
    pub(crate) fn unsupported_relationship(detail: impl Into<String>) -> Self {
        RepositoryError::UnsupportedRelationship(detail.into())
    }

    /// Returns `true` for errors caused by the client request rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RepositoryError::UnsupportedRelationship(_)
                | RepositoryError::AttributeComparisonNotSupported(_)
        )
    }
}

/// A specialized `Result` type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
