//! A channel-like object that closes exactly once (§3: `started-signal`,
//! `synced-signal`).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct Signal {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Close the signal. Idempotent: only the first call has any effect,
    /// satisfying "`synced-signal` closes at most once" (§3 invariant 4).
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait for the signal to close. Returns immediately if already closed.
    /// Race-free against a concurrent `fire()`: `notify_waiters` only wakes
    /// tasks already parked on `notified()`, so we register the waiter
    /// before re-checking the flag.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
            if self.is_fired() {
                return;
            }
        }
    }
}
