//! C5: sync-state reporter.
//!
//! Polls the engine once a second for fast-sync completion, then applies a
//! wall-clock freshness check before declaring the host synced (§4.5).

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use time::OffsetDateTime;

use crate::{engine::EngineClient, mux::ApplicationMultiplexer, signal::Signal};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const FRESHNESS_THRESHOLD: Duration = Duration::from_secs(60);

pub fn spawn_worker(
    engine: Arc<dyn EngineClient>,
    mux: Arc<dyn ApplicationMultiplexer>,
    synced: Arc<Signal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;

            // `is_fast_syncing` may panic internally if the engine has
            // already been torn down (§4.5 "Crash handling"); catch it and
            // exit silently rather than closing `synced` on a dead engine.
            let fast_syncing = match AssertUnwindSafe(engine.is_fast_syncing())
                .catch_unwind()
                .await
            {
                Ok(value) => value,
                Err(_) => {
                    tracing::debug!("sync-state reporter observed a torn-down engine, exiting");
                    return;
                },
            };
            if fast_syncing {
                tracing::debug!("still fast-syncing");
                continue;
            }

            let height = mux.block_height().await;
            if height == 0 {
                synced.fire();
                return;
            }
            let Some(block) = mux.get_block(height).await else {
                synced.fire();
                return;
            };

            let age = OffsetDateTime::now_utc() - block.time;
            if age < time::Duration::try_from(FRESHNESS_THRESHOLD).unwrap_or(time::Duration::ZERO)
            {
                synced.fire();
                return;
            }

            tracing::debug!(height, ?age, "synced but stale, continuing to poll");
        }
    })
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        engine::{Block, CheckTxOutcome, EngineEvent, EngineQuery, EngineSubscription},
        mux::InvalidationWatch,
    };

    struct FakeEngine {
        fast_syncing: parking_lot::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl EngineClient for FakeEngine {
        async fn subscribe(
            &self,
            _query: EngineQuery,
        ) -> anyhow::Result<Box<dyn EngineSubscription>> {
            unimplemented!("not exercised by this test")
        }
        async fn check_tx(&self, _tx: &[u8]) -> CheckTxOutcome {
            CheckTxOutcome::Ok
        }
        async fn broadcast_evidence(&self, _evidence: Vec<u8>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reap_max_txs(&self, _max: usize) -> Vec<Vec<u8>> {
            vec![]
        }
        async fn unconfirmed_txs(&self) -> Vec<Vec<u8>> {
            vec![]
        }
        async fn is_fast_syncing(&self) -> bool {
            let mut states = self.fast_syncing.lock();
            if states.len() > 1 {
                states.remove(0)
            } else {
                states[0]
            }
        }
        async fn peer_count(&self) -> usize {
            0
        }
    }

    struct FakeMux {
        height: u64,
        block_time: OffsetDateTime,
    }

    #[async_trait]
    impl ApplicationMultiplexer for FakeMux {
        async fn block_height(&self) -> u64 {
            self.height
        }
        async fn get_block(&self, height: u64) -> Option<Block> {
            if height == 0 {
                return None;
            }
            Some(Block {
                height,
                hash: vec![],
                time: self.block_time,
                txs: vec![],
            })
        }
        async fn get_transactions(&self, _height: u64) -> Option<Vec<Vec<u8>>> {
            None
        }
        async fn get_transaction_results(&self, _height: u64) -> Option<Vec<crate::engine::TxResult>> {
            None
        }
        async fn estimate_gas(&self, _signer: &[u8], _tx: &[u8]) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn signer_nonce(&self, _signer: &[u8]) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn watch_invalidation(&self, hash: Vec<u8>) -> InvalidationWatch {
            let (_tx, rx) = tokio::sync::oneshot::channel();
            InvalidationWatch { hash, receiver: rx }
        }
        async fn register_application(&self, _name: String) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_block_closes_synced_immediately() {
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngine {
            fast_syncing: parking_lot::Mutex::new(vec![false]),
        });
        let mux: Arc<dyn ApplicationMultiplexer> = Arc::new(FakeMux {
            height: 5,
            block_time: OffsetDateTime::now_utc(),
        });
        let synced = Arc::new(Signal::new());

        let handle = spawn_worker(engine, mux, synced.clone());
        tokio::time::advance(POLL_INTERVAL).await;
        handle.await.unwrap();
        assert!(synced.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn no_committed_blocks_closes_synced() {
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngine {
            fast_syncing: parking_lot::Mutex::new(vec![false]),
        });
        let mux: Arc<dyn ApplicationMultiplexer> = Arc::new(FakeMux {
            height: 0,
            block_time: OffsetDateTime::now_utc(),
        });
        let synced = Arc::new(Signal::new());

        let handle = spawn_worker(engine, mux, synced.clone());
        tokio::time::advance(POLL_INTERVAL).await;
        handle.await.unwrap();
        assert!(synced.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_block_keeps_polling_until_fresh() {
        let stale_time = OffsetDateTime::now_utc() - time::Duration::seconds(120);
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngine {
            fast_syncing: parking_lot::Mutex::new(vec![false, false]),
        });
        let mux: Arc<dyn ApplicationMultiplexer> = Arc::new(FakeMux {
            height: 5,
            block_time: stale_time,
        });
        let synced = Arc::new(Signal::new());

        let handle = spawn_worker(engine, mux, synced.clone());
        tokio::time::advance(POLL_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(
            !synced.is_fired(),
            "a stale block must not close synced-signal"
        );

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn fast_syncing_defers_the_freshness_check() {
        let engine: Arc<dyn EngineClient> = Arc::new(FakeEngine {
            fast_syncing: parking_lot::Mutex::new(vec![true, false]),
        });
        let mux: Arc<dyn ApplicationMultiplexer> = Arc::new(FakeMux {
            height: 5,
            block_time: OffsetDateTime::now_utc(),
        });
        let synced = Arc::new(Signal::new());

        let handle = spawn_worker(engine, mux, synced.clone());
        tokio::time::advance(POLL_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(!synced.is_fired(), "still fast-syncing on first poll");

        tokio::time::advance(POLL_INTERVAL).await;
        handle.await.unwrap();
        assert!(synced.is_fired());
    }
}
