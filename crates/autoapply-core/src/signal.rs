//! Interruption signal: lets an approval preempt the worker's dequeue loop.
//!
//! Level-triggered flag, not a queue of events. Several approvals landing
//! before the worker wakes collapse into one raised flag. The worker clears
//! the flag before scanning, then drains *all* currently-approved tasks; an
//! approval landing mid-drain re-raises the level, so a wakeup can never be
//! lost to the drain/clear race.
//!
//! Process-scoped and rebuilt on restart: the flag carries no durable truth,
//! the `Approved` task states in the store do.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct InterruptSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake any waiter. Idempotent.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clear the flag. The caller clears before scanning so a raise during
    /// the scan is observed on the next pass.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Wait until the flag is raised. Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking, so a raise between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
