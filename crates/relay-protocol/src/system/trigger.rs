use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A cheaply cloneable, one-shot cancellation signal. Every connection handler
/// and background task holds a clone; `trigger()` wakes every waiter and is
/// idempotent.
#[derive(Clone)]
pub struct Trigger {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Trigger {
    pub fn new() -> Self {
        Trigger {
            fired: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Fires the trigger. Safe to call from multiple tasks or more than once.
    pub fn trigger(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        } else {
            // Already fired: still notify in case a waiter subscribed after
            // the flag flipped but before the first notify_waiters() call.
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already triggered, otherwise waits for the
    /// next `trigger()` call. Intended for use inside `tokio::select!`.
    pub async fn wait_async(&self) {
        if self.is_triggered() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_once_triggered() {
        let trigger = Trigger::new();
        trigger.trigger();
        tokio::time::timeout(std::time::Duration::from_millis(50), trigger.wait_async())
            .await
            .expect("wait_async should resolve immediately");
    }

    #[tokio::test]
    async fn wait_resolves_when_triggered_from_another_task() {
        let trigger = Trigger::new();
        let other = trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            other.trigger();
        });
        tokio::time::timeout(std::time::Duration::from_millis(200), trigger.wait_async())
            .await
            .expect("wait_async should resolve once triggered");
    }

    #[test]
    fn double_trigger_is_idempotent() {
        let trigger = Trigger::new();
        trigger.trigger();
        trigger.trigger();
        assert!(trigger.is_triggered());
    }
}
