//! C6: service-client dispatcher.
//!
//! Each domain backend (beacon, key-manager, registry, staking, scheduler,
//! root-hash) exposes a [`ServiceClient`]; the dispatcher owns exactly one
//! worker per client and tracks them through a wait group that `Cleanup`
//! drains (§4.6).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Construction and start order matters: later clients query earlier ones
/// during their own initialization (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceKind {
    Beacon,
    KeyManager,
    Registry,
    Staking,
    Scheduler,
    RootHash,
}

impl ServiceKind {
    pub const ORDER: [ServiceKind; 6] = [
        ServiceKind::Beacon,
        ServiceKind::KeyManager,
        ServiceKind::Registry,
        ServiceKind::Staking,
        ServiceKind::Scheduler,
        ServiceKind::RootHash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Beacon => "beacon",
            ServiceKind::KeyManager => "keymanager",
            ServiceKind::Registry => "registry",
            ServiceKind::Staking => "staking",
            ServiceKind::Scheduler => "scheduler",
            ServiceKind::RootHash => "roothash",
        }
    }
}

/// A domain backend's hook into the host: a blocking worker entry point
/// consuming engine events to maintain its own state.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Runs until `ctx` is cancelled. Implementations must return promptly
    /// once cancellation fires; the dispatcher's `stop` awaits every worker.
    async fn worker(&self, ctx: CancellationToken);
}

/// Owns the registered clients and the spawned worker handles (§3 "a list of
/// service clients and a wait group for their workers").
#[derive(Default)]
pub struct ServiceDispatcher {
    clients: Vec<Arc<dyn ServiceClient>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    ctx: CancellationToken,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
            ctx: CancellationToken::new(),
        }
    }

    /// Appends a client. Callers must register in [`ServiceKind::ORDER`]
    /// (§4.6); this is an append-only list, not a sort, because order of
    /// registration is itself load-bearing for cross-client initialization.
    pub fn register(&mut self, client: Arc<dyn ServiceClient>) {
        self.clients.push(client);
    }

    pub fn registered(&self) -> &[Arc<dyn ServiceClient>] {
        &self.clients
    }

    /// Spawns one worker per registered client, in registration order.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for client in &self.clients {
            let client = client.clone();
            let ctx = self.ctx.clone();
            let kind = client.kind();
            workers.push(tokio::spawn(async move {
                tracing::info!(service = kind.name(), "service-client worker starting");
                client.worker(ctx).await;
                tracing::info!(service = kind.name(), "service-client worker stopped");
            }));
        }
    }

    /// Cancels every worker's context and awaits them all (`Cleanup`
    /// draining the wait group).
    pub async fn stop(&self) {
        self.ctx.cancel();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
