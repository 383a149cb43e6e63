//! Translation of store write failures into [`RepositoryError::DataStoreUpdate`].
//!
//! This is the only place [`DataStoreUpdateError`]s are created.

use tracing::debug;

use crate::{
    backend::WriteOutcome,
    error::{DataStoreUpdateError, DocumentStoreResult, RepositoryError, RepositoryResult},
    session::SessionHolder,
};

/// Wraps the outcome of store writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Passes a successful outcome through. On failure, aborts the active transaction
    /// (if any), clears it from the holder and wraps the store error.
    pub async fn translate<T>(
        session: &mut SessionHolder,
        outcome: DocumentStoreResult<T>,
    ) -> RepositoryResult<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(error = %err, "Store write failed");
                session.abort_after_failure().await;

                Err(RepositoryError::DataStoreUpdate(DataStoreUpdateError::new(
                    err.to_string(),
                    Some(err),
                )))
            }
        }
    }

    /// Checks that a delete was acknowledged and removed a document.
    ///
    /// Neither condition is a store failure, so the transaction is left untouched.
    pub fn ensure_deleted(id: &str, outcome: WriteOutcome) -> RepositoryResult<()> {
        if !outcome.acknowledged {
            return Err(Self::delete_failed(id, "the operation was not acknowledged"));
        }

        if outcome.matched_count == 0 {
            return Err(Self::delete_failed(id, "it does not exist"));
        }

        Ok(())
    }

    fn delete_failed(id: &str, reason: &str) -> RepositoryError {
        RepositoryError::DataStoreUpdate(DataStoreUpdateError::new(
            format!("Failed to delete document with id '{id}', because {reason}."),
            None,
        ))
    }
}
