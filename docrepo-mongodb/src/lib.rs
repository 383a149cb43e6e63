//! MongoDB backend for docrepo.
//!
//! [`MongoDbStore`] runs provider queries on MongoDB and maps sessions and
//! transactions onto driver sessions. Transactions require a replica set or a
//! sharded cluster.
//!
//! Enable it through the `mongodb` feature of the facade crate:
//!
//! ```toml
//! [dependencies]
//! docrepo = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! ```ignore
//! use docrepo::{backend::StoreBackendBuilder, mongodb::MongoDbStore, prelude::*};
//!
//! let backend = MongoDbStore::builder("mongodb://localhost:27017/?replicaSet=rs0", "library")
//!     .build()
//!     .await?;
//! let store = DocumentStore::new(backend);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_mongodb;

pub mod config;
mod query;
mod sanitizer;
pub mod store;

pub use config::MongoDbConfig;
pub use store::{MongoDbSession, MongoDbStore, MongoDbStoreBuilder};
