//! In-memory `engine`/`mux` pair and a builder harness, used by this
//! crate's own integration tests (§1.1 "Test tooling") — the same role the
//! teacher's in-memory network implementation plays for its own test
//! suite, standing in for a real transport/consensus algorithm.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{Block, CheckTxOutcome, EngineClient, EngineEvent, EngineNode, EngineQuery, EngineSubscription, TxResult},
    genesis::{ConsensusParams, EpochTimeParams, Genesis},
    host::{EngineFactory, Host, HostDeps, Identity, MuxFactory, ServiceClientFactory, StateHandle},
    mux::{ApplicationMultiplexer, InvalidationWatch},
    options::{Options, PeerConfig, PruneStrategy},
    services::{ServiceClient, ServiceKind},
    signal::Signal,
};

#[derive(Default)]
struct Inner {
    mempool_cache: HashSet<Vec<u8>>,
    pending: HashSet<Vec<u8>>,
    check_tx_failures: HashMap<Vec<u8>, (String, u32, String)>,
    exec_failures: HashMap<Vec<u8>, (String, u32, String)>,
    fast_syncing: bool,
    peer_count: usize,
    blocks: Vec<Block>,
    results: HashMap<u64, Vec<TxResult>>,
    new_block_subs: Vec<mpsc::UnboundedSender<EngineEvent>>,
    tx_subs: Vec<(Vec<u8>, mpsc::UnboundedSender<EngineEvent>)>,
    invalidation_watches: HashMap<Vec<u8>, oneshot::Sender<String>>,
    registered_applications: Vec<String>,
}

/// Both the engine node and its own client: a production embedding keeps
/// these as distinct types, but the in-memory stand-in has no process
/// boundary between them to preserve.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<parking_lot::Mutex<Inner>>,
    terminated: Arc<Signal>,
}

struct MemoryEngineSubscription {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

#[async_trait]
impl EngineSubscription for MemoryEngineSubscription {
    async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn subscribe(&self, query: EngineQuery) -> anyhow::Result<Box<dyn EngineSubscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        match query {
            EngineQuery::NewBlock => inner.new_block_subs.push(tx),
            EngineQuery::Tx(bytes) => inner.tx_subs.push((bytes, tx)),
        }
        Ok(Box::new(MemoryEngineSubscription { rx }))
    }

    async fn check_tx(&self, tx: &[u8]) -> CheckTxOutcome {
        let mut inner = self.inner.lock();
        if inner.mempool_cache.contains(tx) {
            return CheckTxOutcome::InCache;
        }
        if let Some((codespace, code, log)) = inner.check_tx_failures.remove(tx) {
            return CheckTxOutcome::NotOk { codespace, code, log };
        }
        inner.mempool_cache.insert(tx.to_vec());
        inner.pending.insert(tx.to_vec());
        CheckTxOutcome::Ok
    }

    async fn broadcast_evidence(&self, _evidence: Vec<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reap_max_txs(&self, max: usize) -> Vec<Vec<u8>> {
        self.inner.lock().pending.iter().take(max).cloned().collect()
    }

    async fn unconfirmed_txs(&self) -> Vec<Vec<u8>> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    async fn is_fast_syncing(&self) -> bool {
        self.inner.lock().fast_syncing
    }

    async fn peer_count(&self) -> usize {
        self.inner.lock().peer_count
    }
}

#[async_trait]
impl EngineNode for MemoryEngine {
    fn client(&self) -> Arc<dyn EngineClient> {
        Arc::new(self.clone())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) {
        self.terminated.fire();
    }

    async fn wait_termination(&self) {
        self.terminated.wait().await;
    }
}

pub struct MemoryMux {
    inner: Arc<parking_lot::Mutex<Inner>>,
}

#[async_trait]
impl ApplicationMultiplexer for MemoryMux {
    async fn block_height(&self) -> u64 {
        self.inner.lock().blocks.len() as u64
    }

    async fn get_block(&self, height: u64) -> Option<Block> {
        if height == 0 {
            return None;
        }
        self.inner.lock().blocks.get((height - 1) as usize).cloned()
    }

    async fn get_transactions(&self, height: u64) -> Option<Vec<Vec<u8>>> {
        self.get_block(height).await.map(|b| b.txs)
    }

    async fn get_transaction_results(&self, height: u64) -> Option<Vec<TxResult>> {
        self.inner.lock().results.get(&height).cloned()
    }

    async fn estimate_gas(&self, _signer: &[u8], tx: &[u8]) -> anyhow::Result<u64> {
        Ok(tx.len() as u64 * 10)
    }

    async fn signer_nonce(&self, _signer: &[u8]) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn watch_invalidation(&self, hash: Vec<u8>) -> InvalidationWatch {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().invalidation_watches.insert(hash.clone(), tx);
        InvalidationWatch { hash, receiver: rx }
    }

    async fn register_application(&self, name: String) -> anyhow::Result<()> {
        self.inner.lock().registered_applications.push(name);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) {}
}

/// The shared in-memory ledger a test drives directly: committing blocks,
/// injecting mempool/execution failures, and firing invalidations.
#[derive(Clone)]
pub struct TestLedger {
    pub engine: MemoryEngine,
    pub mux: Arc<MemoryMux>,
}

impl TestLedger {
    pub fn new() -> Self {
        let inner = Arc::new(parking_lot::Mutex::new(Inner::default()));
        Self {
            engine: MemoryEngine {
                inner: inner.clone(),
                terminated: Arc::new(Signal::new()),
            },
            mux: Arc::new(MemoryMux { inner }),
        }
    }

    /// Commits a block containing `txs` in order, emitting a `Tx` event to
    /// every matching subscriber followed by one `NewBlock` event (§4.2,
    /// §4.4 step 5), and advances the mux's committed height to match.
    pub fn commit_block(&self, txs: Vec<Vec<u8>>) -> Block {
        let mut inner = self.engine.inner.lock();
        let height = inner.blocks.len() as u64 + 1;
        let mut results = Vec::with_capacity(txs.len());
        for tx in &txs {
            inner.mempool_cache.insert(tx.clone());
            inner.pending.remove(tx);
            let result = match inner.exec_failures.remove(tx) {
                Some((codespace, code, log)) => TxResult {
                    tx: tx.clone(),
                    ok: false,
                    codespace,
                    code,
                    log,
                },
                None => TxResult {
                    tx: tx.clone(),
                    ok: true,
                    codespace: String::new(),
                    code: 0,
                    log: String::new(),
                },
            };
            inner
                .tx_subs
                .retain(|(want, sender)| *want != result.tx || sender.send(EngineEvent::Tx(result.clone())).is_err());
            results.push(result);
        }

        let block = Block {
            height,
            hash: vec![height as u8],
            time: OffsetDateTime::now_utc(),
            txs,
        };
        inner.blocks.push(block.clone());
        inner.results.insert(height, results);
        inner
            .new_block_subs
            .retain(|sender| sender.send(EngineEvent::NewBlock(block.clone())).is_ok());
        block
    }

    pub fn inject_check_tx_failure(&self, tx: Vec<u8>, codespace: &str, code: u32, log: &str) {
        self.engine
            .inner
            .lock()
            .check_tx_failures
            .insert(tx, (codespace.to_string(), code, log.to_string()));
    }

    pub fn inject_exec_failure(&self, tx: Vec<u8>, codespace: &str, code: u32, log: &str) {
        self.engine
            .inner
            .lock()
            .exec_failures
            .insert(tx, (codespace.to_string(), code, log.to_string()));
    }

    /// Fires the invalidation watch registered for `hash`, if any (§4.4 step 3).
    pub fn inject_invalidation(&self, hash: &[u8], reason: &str) -> bool {
        if let Some(sender) = self.engine.inner.lock().invalidation_watches.remove(hash) {
            sender.send(reason.to_string()).is_ok()
        } else {
            false
        }
    }

    pub fn set_fast_syncing(&self, value: bool) {
        self.engine.inner.lock().fast_syncing = value;
    }

    pub fn set_peer_count(&self, count: usize) {
        self.engine.inner.lock().peer_count = count;
    }

    pub fn registered_applications(&self) -> Vec<String> {
        self.engine.inner.lock().registered_applications.clone()
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

struct StaticMuxFactory(Arc<MemoryMux>);

#[async_trait]
impl MuxFactory for StaticMuxFactory {
    async fn build(
        &self,
        _genesis: &Genesis,
        _options: &Options,
    ) -> anyhow::Result<Arc<dyn ApplicationMultiplexer>> {
        Ok(self.0.clone())
    }
}

struct StaticEngineFactory(MemoryEngine);

#[async_trait]
impl EngineFactory for StaticEngineFactory {
    async fn build(
        &self,
        _genesis: &Genesis,
        _options: &Options,
        _peers: &PeerConfig,
    ) -> anyhow::Result<Arc<dyn EngineNode>> {
        Ok(Arc::new(self.0.clone()))
    }
}

struct NoopServiceClient(ServiceKind);

#[async_trait]
impl ServiceClient for NoopServiceClient {
    fn kind(&self) -> ServiceKind {
        self.0
    }

    async fn worker(&self, ctx: CancellationToken) {
        ctx.cancelled().await;
    }
}

struct NoopServiceClientFactory;

#[async_trait]
impl ServiceClientFactory for NoopServiceClientFactory {
    async fn build(
        &self,
        kind: ServiceKind,
        _built: &[Arc<dyn ServiceClient>],
    ) -> anyhow::Result<Arc<dyn ServiceClient>> {
        Ok(Arc::new(NoopServiceClient(kind)))
    }
}

struct AlwaysValidator;

#[async_trait]
impl StateHandle for AlwaysValidator {
    async fn is_validator(&self, _consensus_key: &[u8], _height: u64) -> bool {
        true
    }
}

pub fn sample_genesis() -> Genesis {
    Genesis {
        consensus_backend: "memory".to_string(),
        chain_id: "test-chain".to_string(),
        initial_height: 1,
        halt_epoch: None,
        epoch_time: EpochTimeParams {
            interval: 600,
            debug_mock_backend: true,
        },
        consensus_params: ConsensusParams {
            timeout_commit: Duration::from_millis(100),
            empty_block_interval: Duration::from_secs(0),
            skip_timeout_commit: false,
        },
        pubkey_blacklist: vec![],
        domains: BTreeMap::new(),
    }
}

pub fn sample_options(data_dir: PathBuf) -> Options {
    Options {
        data_dir,
        abci_prune_strategy: PruneStrategy::Nothing,
        abci_prune_num_kept: 3600,
        checkpointer_disabled: false,
        checkpointer_check_interval: Duration::from_secs(120),
        sentry_upstream_address: vec![],
        p2p_persistent_peer: vec![],
        p2p_persistent_peers_max_dial_period: Duration::from_secs(0),
        p2p_unconditional_peer_ids: vec![],
        p2p_disable_peer_exchange: false,
        min_gas_price: 0,
        debug_allow_unsafe: false,
        debug_disable_check_tx: false,
        debug_unsafe_replay_recover_corrupted_wal: false,
        supplementarysanity_enabled: false,
        supplementarysanity_interval: Duration::from_secs(60),
        state_sync_enabled: false,
        state_sync_consensus_node: vec![],
        state_sync_trust_period: Duration::from_secs(604800),
        state_sync_trust_height: 0,
        state_sync_trust_hash: String::new(),
        metrics_enabled: false,
        logging: consensus_host_utils::logging::Config {
            format: consensus_host_utils::logging::LogFormat::Compact,
            filter: "info".to_string(),
        },
    }
}

fn unique_temp_dir() -> PathBuf {
    let suffix: u64 = rand::thread_rng().gen();
    std::env::temp_dir().join(format!("consensus-host-test-{suffix:x}"))
}

/// Builds a fully wired [`Host`] over an in-memory ledger; the caller keeps
/// the returned [`TestLedger`] to drive block commits and failure injection.
pub struct TestHostBuilder {
    genesis: Genesis,
    options: Options,
    ledger: TestLedger,
}

impl TestHostBuilder {
    pub fn new() -> Self {
        Self {
            genesis: sample_genesis(),
            options: sample_options(unique_temp_dir()),
            ledger: TestLedger::new(),
        }
    }

    pub fn with_genesis(mut self, genesis: Genesis) -> Self {
        self.genesis = genesis;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn ledger(&self) -> TestLedger {
        self.ledger.clone()
    }

    pub async fn build(self) -> anyhow::Result<Arc<Host>> {
        let deps = HostDeps {
            consensus_backend_name: self.genesis.consensus_backend.clone(),
            identity: Identity::default(),
            mux_factory: Arc::new(StaticMuxFactory(self.ledger.mux.clone())),
            engine_factory: Arc::new(StaticEngineFactory(self.ledger.engine.clone())),
            service_factory: Arc::new(NoopServiceClientFactory),
            state: Arc::new(AlwaysValidator),
            real_epoch_time: None,
        };
        Host::new(self.genesis, self.options, deps).await
    }
}

impl Default for TestHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
