//! A resource repository over schema-flexible document stores.
//!
//! This crate is the core of the docrepo project and provides:
//!
//! - **Resource metadata** ([`resource`]) - The narrow view of a resource type the repository needs
//! - **Query layer** ([`expression`], [`layer`]) - Provider-independent read requests
//! - **Validation** ([`validator`]) - Rejects relationship traversal and attribute-to-attribute comparisons
//! - **Provider queries** ([`query`], [`builder`]) - What backends execute, and how layers become them
//! - **Backends and sessions** ([`backend`], [`session`]) - Storage abstraction with transactions
//! - **Repository** ([`repository`]) - Validated reads and error-translated writes
//! - **Error handling** ([`error`], [`translate`]) - Store and repository error taxonomies
//!
//! # Example
//!
//! ```ignore
//! use docrepo::prelude::*;
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
//! let store = DocumentStore::new(InMemoryStore::new());
//! let books = store.repository::<Book>()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_core;

pub mod backend;
pub mod builder;
pub mod cancel;
pub mod collection;
pub mod constraint;
pub mod error;
pub mod expression;
pub mod hooks;
pub mod layer;
pub mod mapping;
pub mod query;
pub mod repository;
pub mod resource;
pub mod session;
pub mod store;
pub mod translate;
pub mod validator;
