//! Cooperative stop signal.
//!
//! A [`StopToken`] is polled at every suspension point of the answer engine
//! and the ingest pipeline. In-flight provider calls race against
//! [`StopToken::cancelled`] and are abandoned when the token fires; their
//! eventual results are ignored and nothing further is enqueued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal stop. Idempotent; wakes every task parked in [`cancelled`].
    ///
    /// [`cancelled`]: StopToken::cancelled
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once stop has been signalled. Safe to race in `select!`
    /// against a provider call.
    pub async fn cancelled(&self) {
        // Register interest before re-checking the flag so a concurrent
        // stop() between check and await cannot be missed.
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_is_sticky() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        token.stop();
        token.stop();
        assert!(token.is_stopped());
        // Must resolve immediately after stop.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = StopToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::task::yield_now().await;
        token.stop();
        assert!(handle.await.unwrap());
    }
}
