//! Edge-triggered, coalescing wake-up signal

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A single-slot wake-up.
///
/// [`notify`](RetrySignal::notify) sets a pending flag and wakes any waiter. Any number of
/// notifications before the next [`wait`](RetrySignal::wait) collapse into one wake-up, and
/// a notification sent while nobody is waiting is kept until someone waits or calls
/// [`clear`](RetrySignal::clear).
#[derive(Debug, Default)]
pub struct RetrySignal {
    pending: AtomicBool,
    notify: Notify,
}

impl RetrySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Wait until a notification is pending, then consume it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent notify is not missed.
            notified.as_mut().enable();

            if self.pending.swap(false, Ordering::AcqRel) {
                return;
            }

            notified.await;
        }
    }

    /// Drop a pending notification, returning whether one was pending.
    pub fn clear(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let signal = RetrySignal::new();

        signal.notify();
        signal.notify();
        signal.notify();

        timeout(Duration::from_millis(50), signal.wait())
            .await
            .expect("first wait should see the pending notification");

        assert!(
            timeout(Duration::from_millis(50), signal.wait())
                .await
                .is_err(),
            "three notifications must collapse into a single wake-up"
        );
    }

    #[tokio::test]
    async fn test_wakes_blocked_waiter() {
        let signal = Arc::new(RetrySignal::new());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::task::yield_now().await;
        signal.notify();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(!signal.clear());
    }

    #[tokio::test]
    async fn test_clear_discards_pending() {
        let signal = RetrySignal::new();
        assert!(!signal.clear());

        signal.notify();
        assert!(signal.clear());

        assert!(timeout(Duration::from_millis(20), signal.wait())
            .await
            .is_err());
    }
}
