//! C2: block notifier.
//!
//! A single worker subscribes once to the engine's new-block query and
//! broadcasts each block to every currently attached watcher (§4.2). Not
//! durable: late attachers never see past blocks, since `new_receiver`
//! starts each watcher at "now".

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    engine::{Block, EngineClient, EngineEvent, EngineQuery},
    pubsub::{BufferedSubscription, SubscriberIds},
};

pub struct BlockNotifier {
    sender: async_broadcast::Sender<Block>,
    // Keeping one inactive receiver alive prevents the broadcast channel
    // from closing itself when the last active watcher detaches.
    _inactive: async_broadcast::InactiveReceiver<Block>,
}

impl BlockNotifier {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        // Overflow drops the oldest block for a lagging watcher rather than
        // blocking the broadcaster; watchers that care about every block
        // should read promptly, matching the "not durable" contract.
        sender.set_overflow(true);
        Self {
            sender,
            _inactive: receiver.deactivate(),
        }
    }

    /// Attach a new watcher. Dropping the returned receiver is always safe.
    pub fn watch(&self) -> async_broadcast::Receiver<Block> {
        self.sender.new_receiver()
    }

    async fn broadcast(&self, block: Block) {
        if let Err(err) = self.sender.broadcast(block).await {
            tracing::debug!(%err, "block notifier has no active watchers");
        }
    }
}

/// Spawn the C2 worker. Deliberately does not watch any host-level
/// cancellation: the worker exits only when the engine cancels the
/// subscription during its own shutdown, per §4.2 "Termination" — watching
/// the host context here would risk the worker tearing itself down before
/// the engine has finished using it, deadlocking engine shutdown.
pub fn spawn_worker(
    client: Arc<dyn EngineClient>,
    notifier: Arc<BlockNotifier>,
    subscriber_ids: SubscriberIds,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sub = match client.subscribe(EngineQuery::NewBlock).await {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!(%err, "block notifier failed to subscribe to new-block events");
                return;
            },
        };
        // Drawn from the same process-wide source the submission manager
        // (C4) uses (§3 invariant 5), so this subscription's id can never
        // collide with a transaction-commit subscription's id.
        let subscriber_id = subscriber_ids.alloc();
        let mut sub = BufferedSubscription::wrap(subscriber_id, sub);
        while let Some(event) = sub.recv().await {
            if let EngineEvent::NewBlock(block) = event {
                notifier.broadcast(block).await;
            }
        }
        tracing::info!("block notifier subscription cancelled, worker exiting");
    })
}
