//! C4: transaction submission protocol.
//!
//! `submit_tx` provides at-most-once-committed, synchronous delivery with
//! invalidation notification (§4.4). The ordering in step 2-before-step-4 is
//! load-bearing: subscribing before broadcasting eliminates the race where
//! the commit event fires before anyone is listening for it.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{CheckTxOutcome, EngineClient, EngineEvent, EngineQuery},
    errors::{HostError, HostResult},
    mux::ApplicationMultiplexer,
    pubsub::{BufferedSubscription, SubscriberIds},
    signal::Signal,
};

/// SHA-256 of the canonical (already-serialized) transaction bytes (§3
/// PendingTx: "its content hash (digest of the serialized bytes)").
pub fn content_hash(signed: &[u8]) -> Vec<u8> {
    Sha256::digest(signed).to_vec()
}

pub struct SubmissionManager {
    engine: Arc<dyn EngineClient>,
    mux: Arc<dyn ApplicationMultiplexer>,
    started: Arc<Signal>,
    subscriber_ids: SubscriberIds,
}

impl SubmissionManager {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        mux: Arc<dyn ApplicationMultiplexer>,
        started: Arc<Signal>,
        subscriber_ids: SubscriberIds,
    ) -> Self {
        Self {
            engine,
            mux,
            started,
            subscriber_ids,
        }
    }

    pub async fn submit_tx(&self, ctx: &CancellationToken, signed: Vec<u8>) -> HostResult<()> {
        let hash = content_hash(&signed);

        // Subscribing before `Started` blocks on `started-signal` or caller
        // cancellation (§8 boundary behaviour) rather than failing fast.
        tokio::select! {
            _ = self.started.wait() => {},
            () = ctx.cancelled() => return Err(HostError::Canceled),
        }

        // Allocated from the same process-wide source the block notifier
        // (C2) draws from (§3 invariant 5); the id travels with the
        // subscription for its whole lifetime rather than being discarded.
        let subscriber_id = self.subscriber_ids.alloc();
        let raw_sub = self
            .engine
            .subscribe(EngineQuery::Tx(signed.clone()))
            .await
            .map_err(|err| HostError::Other(err.to_string()))?;
        let mut sub = BufferedSubscription::wrap(subscriber_id, raw_sub);
        tracing::debug!(subscriber_id, "subscribed for transaction commit event");

        let mut invalidation = self.mux.watch_invalidation(hash).await;

        // Everything from here on must unsubscribe/close on every exit path
        // (§4.4 step 6); `sub` and `invalidation` do so in their `Drop`
        // impls, so a plain early return is sufficient.
        match self.engine.check_tx(&signed).await {
            CheckTxOutcome::InCache => return Err(HostError::DuplicateTx),
            CheckTxOutcome::TransportError(err) => return Err(HostError::Other(err)),
            CheckTxOutcome::NotOk {
                codespace,
                code,
                log,
            } => return Err(HostError::from_result(&codespace, code, &log)),
            CheckTxOutcome::Ok => {},
        }

        loop {
            tokio::select! {
                event = sub.recv() => {
                    match event {
                        Some(EngineEvent::Tx(result)) if result.tx == signed => {
                            return if result.ok {
                                Ok(())
                            } else {
                                Err(HostError::from_result(&result.codespace, result.code, &result.log))
                            };
                        }
                        Some(_) => continue,
                        None => return Err(HostError::Canceled),
                    }
                }
                reason = &mut invalidation.receiver => {
                    return Err(HostError::Invalidated(
                        reason.unwrap_or_else(|_| "invalidation watch closed".to_string()),
                    ));
                }
                () = ctx.cancelled() => return Err(HostError::Canceled),
            }
        }
    }

    pub async fn estimate_gas(&self, signer: &[u8], tx: &[u8]) -> anyhow::Result<u64> {
        self.mux.estimate_gas(signer, tx).await
    }

    /// Evidence travels as an opaque JSON envelope, the same wire convention
    /// `DomainGenesis` uses for domain sections the host doesn't interpret
    /// (§7 "`MalformedEvidence`: evidence failed unmarshal or conversion").
    pub async fn submit_evidence(&self, evidence: Vec<u8>) -> HostResult<()> {
        if let Err(err) = serde_json::from_slice::<serde_json::Value>(&evidence) {
            return Err(HostError::MalformedEvidence(err.to_string()));
        }
        self.engine
            .broadcast_evidence(evidence)
            .await
            .map_err(|err| HostError::Other(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::{
        engine::{Block, EngineSubscription, TxResult},
        mux::InvalidationWatch,
    };

    struct FakeSub {
        rx: mpsc::UnboundedReceiver<EngineEvent>,
    }

    #[async_trait]
    impl EngineSubscription for FakeSub {
        async fn recv(&mut self) -> Option<EngineEvent> {
            self.rx.recv().await
        }
    }

    struct FakeEngine {
        check_tx_outcome: parking_lot::Mutex<Option<CheckTxOutcome>>,
        sub_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
        sub_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    }

    impl FakeEngine {
        fn new(outcome: CheckTxOutcome) -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                check_tx_outcome: parking_lot::Mutex::new(Some(outcome)),
                sub_tx: parking_lot::Mutex::new(Some(tx)),
                sub_rx: parking_lot::Mutex::new(Some(rx)),
            })
        }

        fn sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
            self.sub_tx.lock().clone().unwrap()
        }
    }

    #[async_trait]
    impl EngineClient for FakeEngine {
        async fn subscribe(
            &self,
            _query: EngineQuery,
        ) -> anyhow::Result<Box<dyn EngineSubscription>> {
            let rx = self.sub_rx.lock().take().expect("subscribed twice");
            Ok(Box::new(FakeSub { rx }))
        }
        async fn check_tx(&self, _tx: &[u8]) -> CheckTxOutcome {
            self.check_tx_outcome.lock().take().unwrap()
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
            false
        }
        async fn peer_count(&self) -> usize {
            0
        }
    }

    struct FakeMux {
        invalidation_tx: parking_lot::Mutex<Option<oneshot::Sender<String>>>,
    }

    impl FakeMux {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invalidation_tx: parking_lot::Mutex::new(None),
            })
        }

        fn invalidate(&self, reason: &str) {
            if let Some(tx) = self.invalidation_tx.lock().take() {
                let _ = tx.send(reason.to_string());
            }
        }
    }

    #[async_trait]
    impl ApplicationMultiplexer for FakeMux {
        async fn block_height(&self) -> u64 {
            0
        }
        async fn get_block(&self, _height: u64) -> Option<Block> {
            None
        }
        async fn get_transactions(&self, _height: u64) -> Option<Vec<Vec<u8>>> {
            None
        }
        async fn get_transaction_results(&self, _height: u64) -> Option<Vec<TxResult>> {
            None
        }
        async fn estimate_gas(&self, _signer: &[u8], _tx: &[u8]) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn signer_nonce(&self, _signer: &[u8]) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn watch_invalidation(&self, hash: Vec<u8>) -> InvalidationWatch {
            let (tx, rx) = oneshot::channel();
            *self.invalidation_tx.lock() = Some(tx);
            InvalidationWatch {
                hash,
                receiver: rx,
            }
        }
        async fn register_application(&self, _name: String) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
    }

    fn started_signal() -> Arc<Signal> {
        let s = Arc::new(Signal::new());
        s.fire();
        s
    }

    #[tokio::test]
    async fn successful_commit_returns_ok() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let manager = SubmissionManager::new(
            engine.clone(),
            mux.clone(),
            started_signal(),
            SubscriberIds::new(),
        );

        let tx = vec![1, 2, 3];
        let sender = engine.sender();
        let submit = tokio::spawn({
            let ctx = CancellationToken::new();
            let manager = Arc::new(manager);
            let tx = tx.clone();
            async move { manager.submit_tx(&ctx, tx).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sender
            .send(EngineEvent::Tx(TxResult {
                tx,
                ok: true,
                codespace: String::new(),
                code: 0,
                log: String::new(),
            }))
            .unwrap();

        assert_eq!(submit.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn duplicate_tx_is_reported_before_waiting_for_commit() {
        let engine = FakeEngine::new(CheckTxOutcome::InCache);
        let mux = FakeMux::new();
        let manager = SubmissionManager::new(engine, mux, started_signal(), SubscriberIds::new());

        let ctx = CancellationToken::new();
        let result = manager.submit_tx(&ctx, vec![9, 9, 9]).await;
        assert_eq!(result, Err(HostError::DuplicateTx));
    }

    #[tokio::test]
    async fn invalidation_releases_the_waiting_call() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let manager = Arc::new(SubmissionManager::new(
            engine,
            mux.clone(),
            started_signal(),
            SubscriberIds::new(),
        ));

        let ctx = CancellationToken::new();
        let submit = tokio::spawn({
            let manager = manager.clone();
            async move { manager.submit_tx(&ctx, vec![4, 5, 6]).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        mux.invalidate("evicted on recheck");

        let result = submit.await.unwrap();
        assert_eq!(
            result,
            Err(HostError::Invalidated("evicted on recheck".to_string()))
        );
    }

    #[tokio::test]
    async fn caller_cancellation_unblocks_the_wait() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let manager = Arc::new(SubmissionManager::new(
            engine,
            mux,
            started_signal(),
            SubscriberIds::new(),
        ));

        let ctx = CancellationToken::new();
        let submit = tokio::spawn({
            let manager = manager.clone();
            let ctx = ctx.clone();
            async move { manager.submit_tx(&ctx, vec![7, 8, 9]).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctx.cancel();

        assert_eq!(submit.await.unwrap(), Err(HostError::Canceled));
    }

    #[tokio::test]
    async fn submit_before_started_blocks_until_started_signal_fires() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let started = Arc::new(Signal::new());
        let manager = Arc::new(SubmissionManager::new(
            engine.clone(),
            mux,
            started.clone(),
            SubscriberIds::new(),
        ));

        let tx = vec![1, 1, 1];
        let sender = engine.sender();
        let submit = tokio::spawn({
            let manager = manager.clone();
            let tx = tx.clone();
            async move {
                let ctx = CancellationToken::new();
                manager.submit_tx(&ctx, tx).await
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!submit.is_finished(), "must block while not started");

        started.fire();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sender
            .send(EngineEvent::Tx(TxResult {
                tx,
                ok: true,
                codespace: String::new(),
                code: 0,
                log: String::new(),
            }))
            .unwrap();

        assert_eq!(submit.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn well_formed_evidence_is_forwarded_to_the_engine() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let manager = SubmissionManager::new(engine, mux, started_signal(), SubscriberIds::new());

        let result = manager
            .submit_evidence(br#"{"kind":"double-sign"}"#.to_vec())
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn evidence_that_does_not_parse_is_rejected_before_reaching_the_engine() {
        let engine = FakeEngine::new(CheckTxOutcome::Ok);
        let mux = FakeMux::new();
        let manager = SubmissionManager::new(engine, mux, started_signal(), SubscriberIds::new());

        let result = manager.submit_evidence(b"not json".to_vec()).await;
        assert!(matches!(result, Err(HostError::MalformedEvidence(_))));
    }

    #[tokio::test]
    async fn concurrent_submissions_through_a_shared_allocator_get_distinct_ids() {
        // Two managers sharing one `SubscriberIds`, the same way `Host` hands
        // the same allocator to the submission manager and the block
        // notifier worker: neither can allocate an id the other already has.
        let ids = SubscriberIds::new();
        let engine_a = FakeEngine::new(CheckTxOutcome::Ok);
        let engine_b = FakeEngine::new(CheckTxOutcome::Ok);
        let manager_a = SubmissionManager::new(
            engine_a.clone(),
            FakeMux::new(),
            started_signal(),
            ids.clone(),
        );
        let manager_b = SubmissionManager::new(
            engine_b.clone(),
            FakeMux::new(),
            started_signal(),
            ids.clone(),
        );

        let id_a = manager_a.subscriber_ids.alloc();
        let id_b = manager_b.subscriber_ids.alloc();
        assert_ne!(
            id_a, id_b,
            "ids allocated through a shared SubscriberIds must never collide"
        );
    }
}
