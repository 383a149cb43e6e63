//! Procedural macros for the docrepo project.
//!
//! `#[derive(Resource)]` implements `docrepo::resource::Resource` from field
//! annotations:
//!
//! ```ignore
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Resource)]
//! #[serde(default)]
//! #[resource(name = "books")]
//! pub struct Book {
//!     #[resource(id)]
//!     pub id: String,
//!     #[resource(attr)]
//!     pub caption: String,
//!     #[resource(attr, name = "published", kind = "datetime")]
//!     pub published_at: Option<bson::DateTime>,
//!     #[resource(has_one = "people")]
//!     pub author: Option<String>,
//!     #[resource(has_many = "reviews")]
//!     pub reviews: Vec<String>,
//! }
//! ```
//!
//! Public names default to the camelCase form of the field name. The stored
//! property name is the field name, or the value of `#[serde(rename = "...")]`.
//! Value kinds are inferred from the field type (looking through `Option`) unless
//! given with `kind`.

#[allow(unused_extern_crates)]
extern crate self as docrepo_macros;

use proc_macro::TokenStream;

mod resource;

#[proc_macro_derive(Resource, attributes(resource))]
pub fn derive_resource(input: TokenStream) -> TokenStream {
    resource::derive_resource(input.into()).into()
}
