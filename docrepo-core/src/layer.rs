//! The query layer: everything a read request asks of one resource type.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    expression::{FieldChain, PaginationExpression, QueryExpression, SortExpression, SparseFieldSet},
    resource::ResourceType,
};

/// A provider-independent read request for a single resource type.
///
/// Built with the `with_*` methods, each of which returns a new layer.
#[derive(Debug, Clone)]
pub struct QueryLayer {
    resource_type: Arc<ResourceType>,
    filter: Option<QueryExpression>,
    sort: Option<SortExpression>,
    pagination: Option<PaginationExpression>,
    projection: BTreeMap<String, SparseFieldSet>,
    include: Vec<FieldChain>,
}

impl QueryLayer {
    pub fn new(resource_type: Arc<ResourceType>) -> Self {
        QueryLayer {
            resource_type,
            filter: None,
            sort: None,
            pagination: None,
            projection: BTreeMap::new(),
            include: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: QueryExpression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortExpression) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationExpression) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Requests a sparse fieldset for the resource type with the given public name.
    pub fn with_projection(mut self, resource_type: impl Into<String>, fields: SparseFieldSet) -> Self {
        self.projection
            .insert(resource_type.into(), fields);
        self
    }

    pub fn with_include(mut self, chain: FieldChain) -> Self {
        self.include.push(chain);
        self
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    pub fn filter(&self) -> Option<&QueryExpression> {
        self.filter.as_ref()
    }

    pub fn sort(&self) -> Option<&SortExpression> {
        self.sort.as_ref()
    }

    pub fn pagination(&self) -> Option<&PaginationExpression> {
        self.pagination.as_ref()
    }

    pub fn projection(&self) -> &BTreeMap<String, SparseFieldSet> {
        &self.projection
    }

    /// The sparse fieldset requested for this layer's own resource type, if any.
    pub fn own_projection(&self) -> Option<&SparseFieldSet> {
        self.projection
            .get(self.resource_type.public_name())
    }

    pub fn include(&self) -> &[FieldChain] {
        &self.include
    }
}
