//! Graceful shutdown signal shared by the Scheduler and its Jobs.
//!
//! Once requested, the Scheduler admits no new Jobs and a Job sleeping
//! between retries wakes up and gives up. Transfers already in flight run to
//! completion so no partial file is left at a final name.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Coordinates shutdown across tasks. Share it through an `Arc`.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Wakes every waiter exactly once.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Waits until shutdown is requested. Returns immediately if it already was.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `request` is not missed.
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}
