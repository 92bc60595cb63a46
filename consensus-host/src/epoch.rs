//! Epoch-time backend (§4.7 Phase B step 3: "Construct the epoch-time
//! backend (mock or real per genesis); register it with the mux").
//!
//! The real backend derives epochs from the replicated ledger's own block
//! height and is out of scope here (it depends on domain state the mux
//! owns); [`MockEpochTime`] is the debug backend genesis can select
//! directly, advancing on a wall-clock interval for deterministic tests.

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{HostError, HostResult};

#[async_trait]
pub trait EpochTimeBackend: Send + Sync {
    async fn epoch(&self) -> u64;

    /// Blocks until `epoch` is reached or `ctx` is cancelled.
    async fn wait_epoch(&self, epoch: u64, ctx: CancellationToken) -> HostResult<()>;
}

/// `epoch_time.debug_mock_backend` implementation: epoch advances by one
/// every `interval` seconds, started from process boot.
pub struct MockEpochTime {
    current: AtomicU64,
    interval: std::time::Duration,
}

impl MockEpochTime {
    pub fn new(interval: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicU64::new(0),
            interval,
        })
    }

    /// Spawn the background ticker. Returned handle is aborted on drop by
    /// the caller holding it; the mock backend has no other teardown.
    pub fn spawn_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let interval = this.interval.max(std::time::Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.current.fetch_add(1, Ordering::SeqCst);
            }
        })
    }
}

#[async_trait]
impl EpochTimeBackend for MockEpochTime {
    async fn epoch(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    async fn wait_epoch(&self, epoch: u64, ctx: CancellationToken) -> HostResult<()> {
        loop {
            if self.current.load(Ordering::SeqCst) >= epoch {
                return Ok(());
            }
            tokio::select! {
                () = ctx.cancelled() => return Err(HostError::Canceled),
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {},
            }
        }
    }
}
