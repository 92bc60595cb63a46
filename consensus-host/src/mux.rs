//! Trait boundary for the application multiplexer (out of scope per §1:
//! "the application multiplexer's internals (the ABCI reducer)").
//!
//! The mux is the arbiter of "latest committed height" (§4.7 Queries) and
//! owns the invalidation-watch mechanism `SubmitTx` depends on (§4.4 step 3).

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::engine::{Block, TxResult};

/// A one-shot watch on a pending transaction's content hash. Fires with a
/// human-readable reason when the mux evicts the transaction from the
/// mempool on recheck (§4.4 step 3). Dropping the watch before it fires is
/// always safe and cancels it.
pub struct InvalidationWatch {
    pub hash: Vec<u8>,
    pub receiver: oneshot::Receiver<String>,
}

/// Server-side handle a mux implementation uses to fire a registered watch.
pub struct InvalidationSender(pub oneshot::Sender<String>);

#[async_trait]
pub trait ApplicationMultiplexer: Send + Sync {
    /// The mux's own notion of the latest committed height; `0` means no
    /// block has been committed yet (§8 "`GetBlock(HeightLatest)` returns
    /// `NoCommittedBlocks` iff the mux reports `BlockHeight() == 0`").
    async fn block_height(&self) -> u64;

    async fn get_block(&self, height: u64) -> Option<Block>;
    async fn get_transactions(&self, height: u64) -> Option<Vec<Vec<u8>>>;

    /// Per-transaction execution outcomes for a committed height
    /// (`GetTransactionsWithResults`, §6).
    async fn get_transaction_results(&self, height: u64) -> Option<Vec<TxResult>>;

    async fn estimate_gas(&self, signer: &[u8], tx: &[u8]) -> anyhow::Result<u64>;

    /// Next expected nonce for `signer`, as tracked by the application state
    /// (`GetSignerNonce`, §6).
    async fn signer_nonce(&self, signer: &[u8]) -> anyhow::Result<u64>;

    async fn watch_invalidation(&self, hash: Vec<u8>) -> InvalidationWatch;

    /// Registers a domain application. Invariant 1 (§3): callers must only
    /// invoke this after the mux exists and before the engine is
    /// constructed (i.e. before `Start`).
    async fn register_application(&self, name: String) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self);
}
