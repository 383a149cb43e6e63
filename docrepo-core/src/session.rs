//! Sessions, transactions and the per-request [`SessionHolder`].
//!
//! The holder owns at most one backend session. Repository operations borrow the
//! session from it so that every operation of a unit of work runs in the same
//! transaction. Its life cycle:
//!
//! ```text
//! no session --attach--> session (in transaction or not) --commit/rollback/abort--> no session
//! ```
//!
//! When a write fails inside a transaction the error translator aborts the
//! transaction and clears the holder, so later operations in the same request do
//! not run against a failed transaction.

use std::{any::Any, fmt, fmt::Debug};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DocumentStoreResult, RepositoryError, RepositoryResult};

/// Correlation id of a transaction, stable for its whole lifetime.
///
/// Repositories sharing one [`SessionHolder`] report the same id, which lets an
/// orchestrating operation check that several writes are part of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A backend session.
///
/// Backends downcast handles back to their concrete type through
/// [`as_any_mut`](Self::as_any_mut).
#[async_trait]
pub trait SessionHandle: Send + Debug {
    /// The id of the active transaction, if any.
    fn transaction_id(&self) -> Option<TransactionId>;

    fn is_in_transaction(&self) -> bool {
        self.transaction_id().is_some()
    }

    /// Starts a transaction. Fails if one is already active.
    async fn start_transaction(&mut self) -> DocumentStoreResult<TransactionId>;

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()>;

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Holds the session of the current unit of work.
#[derive(Debug, Default)]
pub struct SessionHolder {
    session: Option<Box<dyn SessionHandle>>,
}

impl SessionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a session. Only one session can be attached at a time.
    pub fn attach(&mut self, session: Box<dyn SessionHandle>) -> RepositoryResult<()> {
        if self.session.is_some() {
            return Err(RepositoryError::Transaction(
                "a session is already attached to this holder".to_string(),
            ));
        }

        debug!(transaction_id = ?session.transaction_id(), "Attached session");
        self.session = Some(session);
        Ok(())
    }

    /// Removes the session without committing or aborting it.
    pub fn detach(&mut self) -> Option<Box<dyn SessionHandle>> {
        self.session.take()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Borrows the attached session for a backend call.
    pub fn handle_mut(&mut self) -> Option<&mut (dyn SessionHandle + 'static)> {
        self.session.as_deref_mut()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_in_transaction())
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.session
            .as_ref()
            .and_then(|session| session.transaction_id())
    }

    /// Commits the active transaction and releases the session.
    pub async fn commit(&mut self) -> RepositoryResult<()> {
        let session = self.transactional_session()?;
        let transaction_id = session.transaction_id();

        session.commit_transaction().await?;
        self.session = None;

        debug!(?transaction_id, "Committed transaction");
        Ok(())
    }

    /// Aborts the active transaction and releases the session.
    pub async fn rollback(&mut self) -> RepositoryResult<()> {
        let session = self.transactional_session()?;
        let transaction_id = session.transaction_id();

        session.abort_transaction().await?;
        self.session = None;

        debug!(?transaction_id, "Rolled back transaction");
        Ok(())
    }

    /// Aborts the active transaction after a failed write and clears the holder.
    ///
    /// Does nothing without an active transaction. The abort is best effort: its own
    /// failure is logged and dropped so the original write error is what surfaces.
    pub(crate) async fn abort_after_failure(&mut self) {
        if !self.is_in_transaction() {
            return;
        }

        if let Some(mut session) = self.session.take() {
            let transaction_id = session.transaction_id();

            match session.abort_transaction().await {
                Ok(()) => debug!(?transaction_id, "Aborted transaction after failed write"),
                Err(err) => warn!(
                    ?transaction_id,
                    error = %err,
                    "Failed to abort transaction after failed write"
                ),
            }
        }
    }

    fn transactional_session(&mut self) -> RepositoryResult<&mut Box<dyn SessionHandle>> {
        match self.session.as_mut() {
            Some(session) if session.is_in_transaction() => Ok(session),
            Some(_) => Err(RepositoryError::Transaction(
                "the attached session has no transaction in progress".to_string(),
            )),
            None => Err(RepositoryError::Transaction(
                "no session is attached".to_string(),
            )),
        }
    }
}
