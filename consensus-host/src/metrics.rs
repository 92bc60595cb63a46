//! Ambient metrics worker (§1.1). A full metrics pipeline is a Non-goal, but
//! the spawn point and its no-op-when-disabled default are part of the
//! lifecycle orchestrator's worker set regardless, so block height and
//! mempool size are always observable via `tracing` spans when enabled.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{engine::EngineClient, mux::ApplicationMultiplexer};

const REPORT_INTERVAL: Duration = Duration::from_secs(15);

pub fn spawn_worker(
    engine: Arc<dyn EngineClient>,
    mux: Arc<dyn ApplicationMultiplexer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REPORT_INTERVAL);
        loop {
            interval.tick().await;
            let height = mux.block_height().await;
            let mempool_size = engine.unconfirmed_txs().await.len();
            let peers = engine.peer_count().await;
            tracing::info!(
                target: "consensus_host::metrics",
                block_height = height,
                mempool_size,
                peers,
                "metrics snapshot"
            );
        }
    })
}
