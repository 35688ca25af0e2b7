//! Retry delay clock.

use std::time::Duration;

use async_trait::async_trait;

/// Sleeps between retry attempts. Tests substitute a recording fake.
#[async_trait]
pub trait RetryTimer: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Production timer backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl RetryTimer for TokioTimer {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
