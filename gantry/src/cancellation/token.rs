//! The run cancellation token.

use std::sync::OnceLock;
use tokio::sync::Notify;
use tracing::debug;

/// Signals that a run should stop.
///
/// The first reason given wins; later calls to [`cancel`](Self::cancel) are
/// no-ops. Waiters parked in [`cancelled`](Self::cancelled) are woken once.
#[derive(Default)]
pub struct CancellationToken {
    reason: OnceLock<String>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns false if the token was already
    /// cancelled, in which case `reason` is discarded.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.reason.set(reason).is_err() {
            return false;
        }
        debug!(reason = self.reason().unwrap_or_default(), "Cancellation requested");
        self.notify.notify_waiters();
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Returns the winning cancellation reason.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Completes once cancellation has been requested.
    ///
    /// Safe to race in `select!`: dropping the future unregisters the waiter.
    pub async fn cancelled(&self) {
        loop {
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
            .field("reason", &self.reason())
            .finish()
    }
}
