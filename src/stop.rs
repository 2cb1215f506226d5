//! Level-triggered stop flag shared by a filter and every suspension point it awaits.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Stop request that wakes every task currently waiting on it.
///
/// Setting the flag is idempotent; once set it stays set.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that actually raised it.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is raised.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
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
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stop_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(signal.stop());
        assert!(!signal.stop());
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_set() {
        let signal = StopSignal::new();
        signal.stop();
        signal.stopped().await;
    }
}
