//! Conversion between resources and stored BSON documents.
//!
//! A stored document carries the identity under [`IDENTITY_FIELD`] followed by one
//! field per attribute. Relationship fields are never written.

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    resource::{AttrAttribute, IDENTITY_FIELD, Resource},
};

/// Document mapping helpers available on every [`Resource`].
pub trait ResourceExt: Resource {
    /// Serializes into the stored document layout.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Deserializes from the stored document layout. Missing fields take their
    /// default values.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Returns the identity value.
    fn identity_value(&self) -> DocumentStoreResult<String>;

    /// Creates a default instance carrying only the given identity.
    fn with_identity(id: &str) -> DocumentStoreResult<Self>;

    /// Copies the given attributes from `source`, leaving every other field untouched.
    fn assign_attributes<'a>(
        &mut self,
        source: &Self,
        attributes: impl IntoIterator<Item = &'a AttrAttribute>,
    ) -> DocumentStoreResult<()>;
}

impl<R: Resource> ResourceExt for R {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        let resource_type = R::resource_type();
        let mut fields = serialize_fields(self)?;

        for relationship in resource_type.relationships() {
            fields.remove(relationship.property_name());
        }

        let id = fields
            .remove(resource_type.identity().property_name())
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!(
                    "resource of type '{}' has no identity field '{}'",
                    resource_type.public_name(),
                    resource_type.identity().property_name()
                ))
            })?;

        let mut document = Document::new();
        document.insert(IDENTITY_FIELD, id);
        for (key, value) in fields {
            document.insert(key, value);
        }

        Ok(document)
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        let resource_type = R::resource_type();
        let mut fields = serialize_fields(&R::default())?;

        for (key, value) in document {
            let key = match key == IDENTITY_FIELD {
                true => resource_type.identity().property_name().to_string(),
                false => key,
            };
            fields.insert(key, value);
        }

        Ok(deserialize_from_bson(Bson::Document(fields))?)
    }

    fn identity_value(&self) -> DocumentStoreResult<String> {
        let resource_type = R::resource_type();
        let fields = serialize_fields(self)?;

        match fields.get(resource_type.identity().property_name()) {
            Some(Bson::String(id)) => Ok(id.clone()),
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "resource of type '{}' has no string identity",
                resource_type.public_name()
            ))),
        }
    }

    fn with_identity(id: &str) -> DocumentStoreResult<Self> {
        let resource_type = R::resource_type();
        let mut fields = serialize_fields(&R::default())?;
        fields.insert(resource_type.identity().property_name(), id);

        Ok(deserialize_from_bson(Bson::Document(fields))?)
    }

    fn assign_attributes<'a>(
        &mut self,
        source: &Self,
        attributes: impl IntoIterator<Item = &'a AttrAttribute>,
    ) -> DocumentStoreResult<()> {
        let source_fields = serialize_fields(source)?;
        let default_fields = serialize_fields(&R::default())?;
        let mut target_fields = serialize_fields(self)?;

        for attr in attributes {
            // Fields skipped by the source's serializer fall back to their default.
            match source_fields
                .get(attr.property_name())
                .or_else(|| default_fields.get(attr.property_name()))
            {
                Some(value) => {
                    target_fields.insert(attr.property_name(), value.clone());
                }
                None => {
                    target_fields.remove(attr.property_name());
                }
            }
        }

        for (key, value) in default_fields {
            if !target_fields.contains_key(&key) {
                target_fields.insert(key, value);
            }
        }

        *self = deserialize_from_bson(Bson::Document(target_fields))?;
        Ok(())
    }
}

fn serialize_fields<R: Resource>(resource: &R) -> DocumentStoreResult<Document> {
    match serialize_to_bson(resource)? {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::Serialization(format!(
            "expected a resource to serialize to a document, got {:?}",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::resource::{
        AttrAttribute, RelationshipAttribute, RelationshipKind, ResourceType, ValueKind,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Book {
        id: String,
        caption: String,
        pages: i32,
        author: Option<String>,
    }

    impl Resource for Book {
        fn resource_type() -> ResourceType {
            ResourceType::builder("books", AttrAttribute::new("id", "id", ValueKind::String))
                .attribute(AttrAttribute::new("caption", "caption", ValueKind::String))
                .attribute(AttrAttribute::new("pages", "pages", ValueKind::Number))
                .relationship(RelationshipAttribute::new(
                    "author",
                    "author",
                    "people",
                    RelationshipKind::ToOne,
                ))
                .build()
        }
    }

    fn book() -> Book {
        Book {
            id: "b1".into(),
            caption: "One".into(),
            pages: 120,
            author: Some("p1".into()),
        }
    }

    #[test]
    fn stored_layout_moves_identity_and_drops_relationships() {
        let document = book()
            .to_document()
            .expect("serializable");

        assert_eq!(document, doc! { "_id": "b1", "caption": "One", "pages": 120 });
    }

    #[test]
    fn reading_back_restores_identity() {
        let restored = Book::from_document(doc! { "_id": "b1", "caption": "One" })
            .expect("deserializable");

        assert_eq!(
            restored,
            Book { id: "b1".into(), caption: "One".into(), ..Default::default() }
        );
    }

    #[test]
    fn with_identity_sets_only_the_identity() {
        let fresh = Book::with_identity("b9").expect("constructible");

        assert_eq!(fresh, Book { id: "b9".into(), ..Default::default() });
        assert_eq!(fresh.identity_value().expect("string id"), "b9");
    }

    /// A resource without `#[serde(default)]`; every field must be present to deserialize.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        caption: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        pages: i64,
    }

    impl Resource for Note {
        fn resource_type() -> ResourceType {
            ResourceType::builder("notes", AttrAttribute::new("id", "id", ValueKind::String))
                .attribute(AttrAttribute::new("caption", "caption", ValueKind::String))
                .attribute(AttrAttribute::new("topic", "topic", ValueKind::String))
                .attribute(AttrAttribute::new("pages", "pages", ValueKind::Number))
                .build()
        }
    }

    #[test]
    fn sparse_documents_fill_missing_fields_with_defaults() {
        let restored = Note::from_document(doc! { "_id": "n1", "caption": "One" })
            .expect("missing fields take their defaults");

        assert_eq!(
            restored,
            Note { id: "n1".into(), caption: "One".into(), ..Default::default() }
        );
    }

    #[test]
    fn assigning_a_skipped_field_resets_it_to_the_default() {
        let mut target = Note {
            id: "n1".into(),
            caption: "One".into(),
            topic: Some("history".into()),
            pages: 3,
        };
        let topic = AttrAttribute::new("topic", "topic", ValueKind::String);

        target
            .assign_attributes(&Note::default(), [&topic])
            .expect("assignable");

        assert_eq!(
            target,
            Note { id: "n1".into(), caption: "One".into(), topic: None, pages: 3 }
        );
    }

    #[test]
    fn assign_attributes_copies_only_targeted_fields() {
        let mut target = Book::with_identity("b2").expect("constructible");
        let caption = AttrAttribute::new("caption", "caption", ValueKind::String);

        target
            .assign_attributes(&book(), [&caption])
            .expect("assignable");

        assert_eq!(
            target,
            Book { id: "b2".into(), caption: "One".into(), ..Default::default() }
        );
    }
}
