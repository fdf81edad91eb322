//! Cancellation token shared by a pipeline run and its rollouts.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Signals a run to stop.
///
/// One token is handed to every action of a run and, through the deploy
/// action, to every delivery task of a rollout. Work either polls
/// [`is_cancelled`](Self::is_cancelled) or races itself against
/// [`cancelled`](Self::cancelled). Only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Later calls are ignored.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let reason = reason.into();
        info!(%reason, "Cancellation requested");
        *self.reason.write() = Some(reason);
        self.notify.notify_waiters();
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the reason passed to the first [`cancel`](Self::cancel).
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once the token has fired.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent `cancel`
            // cannot slip between the check and the await.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
