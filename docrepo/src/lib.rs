//! A relationship-free resource repository over schema-flexible document stores.
//!
//! This crate is the entry point of the docrepo project. It re-exports the core
//! types, the `Resource` derive macro and the storage backends.
//!
//! A [`DocumentRepository`](repository::DocumentRepository) stores each resource as
//! one document in the collection named after its resource type. Reads are validated
//! up front: a read that includes related resources, projects relationship fields,
//! filters or sorts through a relationship, or compares two attributes with each
//! other fails with [`RepositoryError::UnsupportedRelationship`](error::RepositoryError::UnsupportedRelationship)
//! or [`RepositoryError::AttributeComparisonNotSupported`](error::RepositoryError::AttributeComparisonNotSupported)
//! before the store is contacted. Writes run inside a translation boundary that turns
//! store failures into [`RepositoryError::DataStoreUpdate`](error::RepositoryError::DataStoreUpdate)
//! and aborts the enclosing transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Resource)]
//! #[serde(default)]
//! #[resource(name = "books")]
//! pub struct Book {
//!     #[resource(id)]
//!     pub id: String,
//!     #[resource(attr)]
//!     pub caption: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!     let books = store.repository::<Book>()?;
//!     let cancel = CancellationToken::new();
//!
//!     let mut session = SessionHolder::new();
//!     store.begin_transaction(&mut session).await?;
//!
//!     let request = Book { caption: "Two".into(), ..Default::default() };
//!     let mut book = books.prepare_for_create("b2", &cancel).await?;
//!     let targeted = TargetedFields::all_attributes(books.resource_type());
//!     books.create(&mut session, &targeted, &request, &mut book, &cancel).await?;
//!     session.commit().await?;
//!
//!     let caption = books.resource_type().attribute("caption").cloned().ok_or("books have a caption")?;
//!     let layer = QueryLayer::new(books.resource_type().clone())
//!         .with_filter(QueryExpression::equals(FieldChain::single(caption), "Two"));
//!
//!     let found = books.get(&mut SessionHolder::new(), &layer, &cancel).await?;
//!     assert_eq!(found.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage with snapshot transactions
//! - [`mongodb`] - MongoDB storage (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docrepo;

pub mod prelude;

pub use docrepo_core::{
    backend, builder, cancel, collection, constraint, error, expression, hooks, layer, mapping,
    query, repository, resource, session, store, translate, validator,
};
pub use docrepo_macros::Resource;

pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use docrepo_memory::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrepo_mongodb::{MongoDbConfig, MongoDbSession, MongoDbStore, MongoDbStoreBuilder};
}
