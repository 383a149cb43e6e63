//! Resource metadata and the [`Resource`] trait.
//!
//! A resource is a serde-serializable type with exactly one identity field, a set of
//! attributes (persisted as document fields) and a set of relationships (never
//! persisted by this crate). The metadata kept here is intentionally narrow: the
//! repository only needs to know the public name of the resource type, which fields
//! are attributes and which are relationships.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Resource)]
//! #[serde(default)]
//! #[resource(name = "books")]
//! pub struct Book {
//!     #[resource(id)]
//!     pub id: String,
//!     #[resource(attr)]
//!     pub caption: String,
//!     #[resource(has_one = "people")]
//!     pub author: Option<String>,
//! }
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::expression::FieldChain;

/// Name of the document field the identity of a resource is stored under.
pub const IDENTITY_FIELD: &str = "_id";

/// Core trait that all resources handled by a repository must implement.
///
/// Resources are converted to and from BSON through serde. Types should be annotated
/// with `#[serde(default)]` so that documents read with a sparse projection, or without
/// their relationship fields, can still be deserialized.
pub trait Resource: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Returns the metadata describing this resource type.
    fn resource_type() -> ResourceType;
}

/// The kind of value an attribute holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    String,
    Boolean,
    Number,
    DateTime,
    Uuid,
    Enum,
    Other,
}

/// An attribute of a resource type, persisted as a document field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrAttribute {
    public_name: String,
    property_name: String,
    kind: ValueKind,
}

impl AttrAttribute {
    pub fn new(
        public_name: impl Into<String>,
        property_name: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            property_name: property_name.into(),
            kind,
        }
    }

    /// The name clients use to refer to this attribute.
    pub fn public_name(&self) -> &str {
        &self.public_name
    }

    /// The serde field name of this attribute.
    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationshipKind {
    ToOne,
    ToMany,
}

/// A relationship from one resource type to another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipAttribute {
    public_name: String,
    property_name: String,
    right_type: String,
    kind: RelationshipKind,
}

impl RelationshipAttribute {
    pub fn new(
        public_name: impl Into<String>,
        property_name: impl Into<String>,
        right_type: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            property_name: property_name.into(),
            right_type: right_type.into(),
            kind,
        }
    }

    pub fn public_name(&self) -> &str {
        &self.public_name
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    /// Public name of the resource type on the other side of the relationship.
    pub fn right_type(&self) -> &str {
        &self.right_type
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }
}

/// A field of a resource type: either an attribute or a relationship.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceField {
    Attribute(AttrAttribute),
    Relationship(RelationshipAttribute),
}

impl ResourceField {
    pub fn public_name(&self) -> &str {
        match self {
            ResourceField::Attribute(attr) => attr.public_name(),
            ResourceField::Relationship(relationship) => relationship.public_name(),
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, ResourceField::Relationship(_))
    }

    pub fn as_attribute(&self) -> Option<&AttrAttribute> {
        match self {
            ResourceField::Attribute(attr) => Some(attr),
            ResourceField::Relationship(_) => None,
        }
    }
}

impl From<AttrAttribute> for ResourceField {
    fn from(attr: AttrAttribute) -> Self {
        ResourceField::Attribute(attr)
    }
}

impl From<RelationshipAttribute> for ResourceField {
    fn from(relationship: RelationshipAttribute) -> Self {
        ResourceField::Relationship(relationship)
    }
}

/// Metadata describing a resource type.
///
/// The identity is also listed among the attributes, so that it can be filtered and
/// sorted on like any other attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    public_name: String,
    identity: AttrAttribute,
    attributes: Vec<AttrAttribute>,
    relationships: Vec<RelationshipAttribute>,
}

impl ResourceType {
    /// Creates a builder for a resource type with the given public name and identity.
    pub fn builder(public_name: impl Into<String>, identity: AttrAttribute) -> ResourceTypeBuilder {
        ResourceTypeBuilder::new(public_name, identity)
    }

    /// The public name of the resource type. Documents are stored in a collection of this name.
    pub fn public_name(&self) -> &str {
        &self.public_name
    }

    pub fn identity(&self) -> &AttrAttribute {
        &self.identity
    }

    pub fn attributes(&self) -> &[AttrAttribute] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[RelationshipAttribute] {
        &self.relationships
    }

    pub fn attribute(&self, public_name: &str) -> Option<&AttrAttribute> {
        self.attributes
            .iter()
            .find(|attr| attr.public_name() == public_name)
    }

    pub fn relationship(&self, public_name: &str) -> Option<&RelationshipAttribute> {
        self.relationships
            .iter()
            .find(|relationship| relationship.public_name() == public_name)
    }

    /// Looks up an attribute or relationship by its public name.
    pub fn field(&self, public_name: &str) -> Option<ResourceField> {
        self.attribute(public_name)
            .cloned()
            .map(ResourceField::Attribute)
            .or_else(|| {
                self.relationship(public_name)
                    .cloned()
                    .map(ResourceField::Relationship)
            })
    }

    /// Returns `true` if the attribute is the identity of this resource type.
    pub fn is_identity(&self, attr: &AttrAttribute) -> bool {
        attr.property_name() == self.identity.property_name()
    }

    /// Returns the document field an attribute is persisted under.
    pub fn stored_field_name<'a>(&self, attr: &'a AttrAttribute) -> &'a str {
        if self.is_identity(attr) {
            IDENTITY_FIELD
        } else {
            attr.property_name()
        }
    }
}

/// Builder for [`ResourceType`].
#[derive(Debug, Clone)]
pub struct ResourceTypeBuilder {
    public_name: String,
    identity: AttrAttribute,
    attributes: Vec<AttrAttribute>,
    relationships: Vec<RelationshipAttribute>,
}

impl ResourceTypeBuilder {
    pub fn new(public_name: impl Into<String>, identity: AttrAttribute) -> Self {
        Self {
            public_name: public_name.into(),
            attributes: vec![identity.clone()],
            identity,
            relationships: Vec::new(),
        }
    }

    pub fn attribute(mut self, attr: AttrAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipAttribute) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn build(self) -> ResourceType {
        ResourceType {
            public_name: self.public_name,
            identity: self.identity,
            attributes: self.attributes,
            relationships: self.relationships,
        }
    }
}

/// Read-only catalogue of the resource types known to the application.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    types: BTreeMap<String, Arc<ResourceType>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resource type of `R`.
    pub fn with<R: Resource>(self) -> Self {
        self.with_type(R::resource_type())
    }

    pub fn with_type(mut self, resource_type: ResourceType) -> Self {
        self.types.insert(
            resource_type.public_name().to_string(),
            Arc::new(resource_type),
        );
        self
    }

    pub fn get(&self, public_name: &str) -> Option<Arc<ResourceType>> {
        self.types.get(public_name).cloned()
    }

    pub fn get_for<R: Resource>(&self) -> Option<Arc<ResourceType>> {
        self.get(R::resource_type().public_name())
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.types.values()
    }

    /// Resolves a dot-separated path such as `"author.name"` into a field chain,
    /// starting at the given resource type and following relationships.
    ///
    /// Returns `None` if any segment is unknown.
    pub fn resolve_chain(&self, resource_type: &ResourceType, path: &str) -> Option<FieldChain> {
        let mut fields = Vec::new();
        let mut current = Some(resource_type.clone());

        for segment in path.split('.') {
            let field = current.as_ref()?.field(segment)?;

            current = match &field {
                ResourceField::Relationship(relationship) => self
                    .get(relationship.right_type())
                    .map(|right| (*right).clone()),
                ResourceField::Attribute(_) => None,
            };
            fields.push(field);
        }

        FieldChain::new(fields)
    }
}

/// The attributes and relationships a write request assigns.
#[derive(Debug, Clone, Default)]
pub struct TargetedFields {
    attributes: BTreeSet<AttrAttribute>,
    relationships: BTreeSet<RelationshipAttribute>,
}

impl TargetedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets every attribute of the resource type, excluding its identity.
    pub fn all_attributes(resource_type: &ResourceType) -> Self {
        Self {
            attributes: resource_type
                .attributes()
                .iter()
                .filter(|attr| !resource_type.is_identity(attr))
                .cloned()
                .collect(),
            relationships: BTreeSet::new(),
        }
    }

    pub fn with_attribute(mut self, attr: AttrAttribute) -> Self {
        self.attributes.insert(attr);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipAttribute) -> Self {
        self.relationships.insert(relationship);
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttrAttribute> {
        self.attributes.iter()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipAttribute> {
        self.relationships.iter()
    }

    pub fn has_relationships(&self) -> bool {
        !self.relationships.is_empty()
    }
}
