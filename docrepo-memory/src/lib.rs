//! In-memory document storage backend for docrepo.
//!
//! [`InMemoryStore`] keeps every collection in memory behind an async-aware
//! read-write lock. It supports the full provider query (filtering, multi-key
//! sorting, pagination and projection) and snapshot transactions, which makes it
//! suitable for development and tests.
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let books = store.repository::<Book>()?;
//!
//! let mut session = SessionHolder::new();
//! store.begin_transaction(&mut session).await?;
//! // ... writes through `books` ...
//! session.commit().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_memory;

mod evaluator;
pub mod store;

pub use store::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
