//! Field name escaping for MongoDB.
//!
//! MongoDB reserves dots and dollar signs in field names and rejects null bytes.
//! Stored attribute names may contain any of them, so keys are escaped on the way in
//! and restored on the way out. Values are stored unchanged.

use bson::{Bson, Document};

use docrepo_core::resource::IDENTITY_FIELD;

pub(crate) struct KeySanitizer;

impl KeySanitizer {
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "__dot__"),
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    pub(crate) fn sanitize_key(key: &str) -> String {
        if key == IDENTITY_FIELD {
            return key.to_string();
        }

        Self::REPLACEMENTS
            .iter()
            .fold(key.to_string(), |key, (target, replacement)| key.replace(target, replacement))
    }

    pub(crate) fn restore_key(key: &str) -> String {
        Self::REPLACEMENTS
            .iter()
            .rev()
            .fold(key.to_string(), |key, (target, replacement)| key.replace(replacement, target))
    }

    /// Escapes the keys of `document` and of every document nested in it.
    pub(crate) fn sanitize_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| (Self::sanitize_key(&key), Self::map_nested(value, Self::sanitize_document)))
            .collect()
    }

    /// Reverts [`sanitize_document`](Self::sanitize_document).
    pub(crate) fn restore_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| (Self::restore_key(&key), Self::map_nested(value, Self::restore_document)))
            .collect()
    }

    fn map_nested(value: Bson, map: fn(Document) -> Document) -> Bson {
        match value {
            Bson::Document(document) => Bson::Document(map(document)),
            Bson::Array(items) => Bson::Array(
                items
                    .into_iter()
                    .map(|item| Self::map_nested(item, map))
                    .collect(),
            ),
            other => other,
        }
    }
}
