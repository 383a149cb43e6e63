//! Cooperative cancellation.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

/// A clonable signal that an operation should stop waiting.
///
/// All clones observe the same state; once cancelled a token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        CancellationToken { sender: Arc::new(sender) }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        receiver
            .wait_for(|cancelled| *cancelled)
            .await
            .ok();
    }

    /// Runs `future` to completion unless the token fires first.
    ///
    /// Returns `None` without polling `future` if the token is already cancelled.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
