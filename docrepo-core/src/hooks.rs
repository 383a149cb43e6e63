//! Extension points invoked around repository writes.

use async_trait::async_trait;

use crate::{cancel::CancellationToken, error::RepositoryResult, resource::Resource};

/// The kind of write a hook is invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOperationKind {
    CreateResource,
    UpdateResource,
    DeleteResource,
    SetRelationship,
    AddToRelationship,
    RemoveFromRelationship,
}

/// Hooks run by [`DocumentRepository`](crate::repository::DocumentRepository) before
/// and after each write.
///
/// `on_writing` runs after attributes have been assigned and may still change the
/// resource; returning an error aborts the write before the store is called.
/// `on_write_succeeded` runs only after the store accepted the write.
#[async_trait]
pub trait ResourceWriteHooks<R: Resource>: Send + Sync {
    async fn on_writing(
        &self,
        _resource: &mut R,
        _kind: WriteOperationKind,
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        Ok(())
    }

    async fn on_write_succeeded(
        &self,
        _resource: &R,
        _kind: WriteOperationKind,
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWriteHooks;

impl<R: Resource> ResourceWriteHooks<R> for NoopWriteHooks {}
