//! Trait boundary for the BFT engine (out of scope per §1: "the BFT engine
//! itself (consensus algorithm, mempool, p2p, WAL)").
//!
//! The host is written against these traits; a production binary injects a
//! real engine adapter, and [`crate::testing`] provides an in-memory one for
//! the test harness — the same shape as the teacher's `ConnectedNetwork`
//! trait standing in for a real libp2p/CDN transport.

use std::sync::Arc;

use async_trait::async_trait;

/// A committed block as the engine reports it. Opaque beyond what the host
/// needs: height, content hash, wall-clock time, and the raw transaction
/// bytes in commit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: Vec<u8>,
    pub time: time::OffsetDateTime,
    pub txs: Vec<Vec<u8>>,
}

/// Result of executing a single transaction, as carried by a transaction
/// event (§4.4 step 5(a)).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxResult {
    pub tx: Vec<u8>,
    pub ok: bool,
    pub codespace: String,
    pub code: u32,
    pub log: String,
}

/// The small, closed set of event kinds the host consumes from the engine's
/// pubsub (§9 "Dynamic event payloads").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    NewBlock(Block),
    Tx(TxResult),
}

/// A subscription query recognized by the engine (§4.2, §4.4 step 2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineQuery {
    NewBlock,
    /// "transaction event where tx = serialized bytes"
    Tx(Vec<u8>),
}

/// Outcome of submitting a transaction to the local mempool via `CheckTx`
/// (§4.4 step 4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckTxOutcome {
    Ok,
    /// `ErrTxInCache`.
    InCache,
    TransportError(String),
    NotOk {
        codespace: String,
        code: u32,
        log: String,
    },
}

/// A live subscription to the engine's event bus. `recv` returning `None`
/// is the cancellation signal, covering both explicit cancellation and the
/// "no error, nil handle" sentinel the engine returns during shutdown
/// (§4.1 "Edge cases").
#[async_trait]
pub trait EngineSubscription: Send {
    async fn recv(&mut self) -> Option<EngineEvent>;
}

/// The engine's client surface: mempool admission, evidence, subscriptions,
/// and fast-sync/reactor introspection (§4.4, §4.5, §4.6).
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn subscribe(&self, query: EngineQuery) -> anyhow::Result<Box<dyn EngineSubscription>>;
    async fn check_tx(&self, tx: &[u8]) -> CheckTxOutcome;
    async fn broadcast_evidence(&self, evidence: Vec<u8>) -> anyhow::Result<()>;
    async fn reap_max_txs(&self, max: usize) -> Vec<Vec<u8>>;
    async fn unconfirmed_txs(&self) -> Vec<Vec<u8>>;

    /// Queries the engine's consensus reactor directly. May panic internally
    /// if the engine has already been torn down; callers that run this
    /// concurrently with shutdown must guard with `catch_unwind` (§4.5
    /// "Crash handling").
    async fn is_fast_syncing(&self) -> bool;

    async fn peer_count(&self) -> usize;
}

/// The running engine node: owns the client, and exposes the one signal the
/// failure monitor needs (§4.3).
#[async_trait]
pub trait EngineNode: Send + Sync {
    fn client(&self) -> Arc<dyn EngineClient>;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self);

    /// Resolves when the engine's consensus state machine has terminated,
    /// whether via clean shutdown or crash. Modeled as a future rather than
    /// a raw channel per §9's "future/promise per channel" guidance.
    async fn wait_termination(&self);
}
