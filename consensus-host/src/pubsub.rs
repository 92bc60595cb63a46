//! C1: pubsub buffer shim.
//!
//! Wraps an engine subscription — which may be force-unsubscribed by the
//! engine if its internal bounded channel fills — in an unbounded in-process
//! queue, so a slow consumer never back-pressures the engine (§4.1).

use std::sync::{atomic::AtomicU64, Arc};

use tokio::task::JoinHandle;

use crate::engine::{EngineEvent, EngineSubscription};

/// Allocates the subscriber ids referenced by §3 invariant 5 ("Subscriber
/// IDs are unique for the life of the process"). A single instance is shared
/// by every subscription-creating component (`Host` hands the same
/// `SubscriberIds` to both the block notifier worker (C2) and the
/// submission manager (C4)), so ids allocated through it can never collide
/// regardless of which component asks first.
#[derive(Clone, Default)]
pub struct SubscriberIds(Arc<AtomicU64>);

impl SubscriberIds {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub fn alloc(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

/// An engine subscription backed by an unbounded FIFO. `async_channel`'s
/// unbounded channel already behaves as the pump-and-drain pair described in
/// §4.1 ("a dedicated pump routine... a second routine drains"): the pump
/// task below is the first routine, and the channel itself satisfies the
/// second without a further task.
pub struct BufferedSubscription {
    subscriber_id: u64,
    rx: async_channel::Receiver<EngineEvent>,
    pump: JoinHandle<()>,
}

impl BufferedSubscription {
    /// `subscriber_id` is the id allocated for this subscription (§4.1, §3
    /// invariant 5); it travels with the subscription for its whole lifetime
    /// so the id genuinely identifies this subscription rather than being
    /// discarded at the call site.
    pub fn wrap(subscriber_id: u64, mut inner: Box<dyn EngineSubscription>) -> Self {
        let (tx, rx) = async_channel::unbounded();
        let pump = tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                // No conditional delay: push immediately regardless of
                // whether the consumer has drained prior events.
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            // `inner.recv()` returning `None` covers both explicit
            // cancellation and the shutdown sentinel (§4.1 edge cases);
            // dropping `tx` here lets `rx` drain whatever is already
            // queued before reporting closed.
        });
        Self { subscriber_id, rx, pump }
    }

    pub fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    /// Receive the next event in emission order, or `None` once the
    /// underlying subscription is cancelled and the queue has drained.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await.ok()
    }
}

impl Drop for BufferedSubscription {
    fn drop(&mut self) {
        tracing::debug!(subscriber_id = self.subscriber_id, "subscription torn down");
        self.pump.abort();
    }
}
