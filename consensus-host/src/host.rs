//! C7: the lifecycle orchestrator (§4.7).
//!
//! `Host::new` folds spec Phases A-C (fetch genesis, lazy init, mux
//! construction, service-client construction) into a single async
//! constructor and always returns a host already at `Phase::Initialized` —
//! the `Created` phase described in §3 exists only for the instant between
//! allocating the struct and finishing construction, and is never visible
//! to a caller holding the returned `Arc<Host>`. `start`/`stop` implement
//! Phases D/E.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::OnceCell, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{Block, EngineClient, EngineNode, TxResult},
    epoch::{EpochTimeBackend, MockEpochTime},
    errors::{HostError, HostResult},
    genesis::{ConsensusParamsSnapshot, Genesis, GenesisSnapshot, PublicKeyBytes},
    mux::ApplicationMultiplexer,
    notifier::{self, BlockNotifier},
    options::{Options, PeerConfig},
    pubsub::SubscriberIds,
    services::{ServiceClient, ServiceDispatcher, ServiceKind},
    signal::Signal,
    submission::{content_hash, SubmissionManager},
    sync, metrics,
};

/// Lifecycle state machine (§3). Transitions are one-directional; `phase`
/// only ever moves forward through this list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    Initialized,
    Started,
    Synced,
    Stopping,
    Stopped,
}

/// Opaque identity keypairs (§3 "Identity"); signing itself is out of scope.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub consensus_key: PublicKeyBytes,
    pub node_key: PublicKeyBytes,
    pub p2p_key: PublicKeyBytes,
}

/// The captured state-database handle (§9 "Database provider wrapping").
/// Production wires this to the real validator-set query; the test harness
/// supplies a stub. `Host::new` fails construction if this hook does not
/// fire, matching §4.7 Phase C step 6 ("construction fails if this hook
/// does not fire") — modeled here as a required constructor argument rather
/// than a callback, since the callback's only externally visible effect is
/// populating exactly this value.
#[async_trait]
pub trait StateHandle: Send + Sync {
    async fn is_validator(&self, consensus_key: &[u8], height: u64) -> bool;
}

#[async_trait]
pub trait MuxFactory: Send + Sync {
    async fn build(
        &self,
        genesis: &Genesis,
        options: &Options,
    ) -> anyhow::Result<Arc<dyn ApplicationMultiplexer>>;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// `peers` is the already-materialized, lowercased peer graph (§4.7
    /// Phase C steps 3-4); the factory must not recompute it from `options`.
    async fn build(
        &self,
        genesis: &Genesis,
        options: &Options,
        peers: &PeerConfig,
    ) -> anyhow::Result<Arc<dyn EngineNode>>;
}

/// Builds one service client at a time, in `ServiceKind::ORDER`. `built`
/// holds every client constructed so far, so a later client (e.g. staking)
/// can query an earlier one (e.g. registry) during its own construction
/// (§4.6).
#[async_trait]
pub trait ServiceClientFactory: Send + Sync {
    async fn build(
        &self,
        kind: ServiceKind,
        built: &[Arc<dyn ServiceClient>],
    ) -> anyhow::Result<Arc<dyn ServiceClient>>;
}

/// Everything `Host::new` needs that this crate treats as an external
/// collaborator. Production binaries provide real adapters; the `testing`
/// module provides in-memory ones.
pub struct HostDeps {
    pub consensus_backend_name: String,
    pub identity: Identity,
    pub mux_factory: Arc<dyn MuxFactory>,
    pub engine_factory: Arc<dyn EngineFactory>,
    pub service_factory: Arc<dyn ServiceClientFactory>,
    pub state: Arc<dyn StateHandle>,
    /// Real epoch-time backend, used when `genesis.epoch_time.debug_mock_backend`
    /// is false. `None` makes `GetEpoch`/`WaitEpoch` report `Unsupported`.
    pub real_epoch_time: Option<Arc<dyn EpochTimeBackend>>,
}

type AuthHandler = dyn Fn(&[u8]) -> bool + Send + Sync;
type HaltHook = dyn Fn() + Send + Sync;

pub struct Host {
    genesis: Genesis,
    options: Options,
    identity: Identity,
    engine_factory: Arc<dyn EngineFactory>,
    state: Arc<dyn StateHandle>,

    phase: tokio::sync::Mutex<Phase>,
    started_signal: Arc<Signal>,
    synced_signal: Arc<Signal>,
    quit_signal: Arc<Signal>,
    subscriber_ids: SubscriberIds,

    mux: Arc<dyn ApplicationMultiplexer>,
    engine_node: OnceCell<Arc<dyn EngineNode>>,
    engine_client: OnceCell<Arc<dyn EngineClient>>,
    submission: OnceCell<Arc<SubmissionManager>>,
    notifier: Arc<BlockNotifier>,
    failure_monitor: Arc<crate::failure_monitor::FailureMonitor>,

    epoch_time: Option<Arc<dyn EpochTimeBackend>>,
    epoch_ticker: parking_lot::Mutex<Option<JoinHandle<()>>>,

    services: Arc<ServiceDispatcher>,
    background_workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,

    halt_hooks: parking_lot::Mutex<Vec<Box<HaltHook>>>,
    auth_handler: parking_lot::RwLock<Option<Arc<AuthHandler>>>,
    blacklist: parking_lot::RwLock<Vec<PublicKeyBytes>>,
}

impl Host {
    /// Phases A-C: fetch/verify genesis, build the mux, construct the
    /// epoch-time backend, construct service clients in dependency order.
    /// The engine itself is deferred to `start` (Phase D), since its
    /// constructor runs replay/InitChain and must not run until every
    /// domain application is registered (§3 invariant 2).
    pub async fn new(genesis: Genesis, options: Options, deps: HostDeps) -> anyhow::Result<Arc<Host>> {
        genesis.verify_backend(&deps.consensus_backend_name)?;
        std::fs::create_dir_all(&options.data_dir)?;

        let mux = deps.mux_factory.build(&genesis, &options).await?;

        let (epoch_time, epoch_ticker): (Option<Arc<dyn EpochTimeBackend>>, Option<JoinHandle<()>>) =
            if genesis.epoch_time.debug_mock_backend {
                let mock = MockEpochTime::new(Duration::from_secs(genesis.epoch_time.interval.max(1)));
                let ticker = mock.spawn_ticker();
                (Some(mock as Arc<dyn EpochTimeBackend>), Some(ticker))
            } else {
                (deps.real_epoch_time.clone(), None)
            };

        if epoch_time.is_some() {
            mux.register_application("epoch-time".to_string()).await?;
        }

        let mut dispatcher = ServiceDispatcher::new();
        let mut built: Vec<Arc<dyn ServiceClient>> = Vec::with_capacity(ServiceKind::ORDER.len());
        for kind in ServiceKind::ORDER {
            let client = deps.service_factory.build(kind, &built).await?;
            built.push(client.clone());
            dispatcher.register(client);
        }

        if options.supplementarysanity_enabled {
            tracing::debug!(
                "supplementary-sanity application requested; the ABCI reducer that \
                 would host it is out of scope for this crate"
            );
        }

        Ok(Arc::new(Host {
            blacklist: parking_lot::RwLock::new(genesis.pubkey_blacklist.clone()),
            genesis,
            options,
            identity: deps.identity,
            engine_factory: deps.engine_factory,
            state: deps.state,
            phase: tokio::sync::Mutex::new(Phase::Initialized),
            started_signal: Arc::new(Signal::new()),
            synced_signal: Arc::new(Signal::new()),
            quit_signal: Arc::new(Signal::new()),
            subscriber_ids: SubscriberIds::new(),
            mux,
            engine_node: OnceCell::new(),
            engine_client: OnceCell::new(),
            submission: OnceCell::new(),
            notifier: Arc::new(BlockNotifier::new(256)),
            failure_monitor: crate::failure_monitor::FailureMonitor::new(),
            epoch_time,
            epoch_ticker: parking_lot::Mutex::new(epoch_ticker),
            services: Arc::new(dispatcher),
            background_workers: parking_lot::Mutex::new(Vec::new()),
            halt_hooks: parking_lot::Mutex::new(Vec::new()),
            auth_handler: parking_lot::RwLock::new(None),
        }))
    }

    // ---- Lifecycle (§6) ----

    /// Phase D. Errors leave the host `Initialized` but not `Started`
    /// (§7 "User-visible behaviour"), so the embedding process can exit
    /// cleanly without any spawned workers.
    pub async fn start(self: &Arc<Self>) -> HostResult<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Initialized => {},
            Phase::Created => unreachable!("Host::new always returns a host past Created"),
            Phase::Started | Phase::Synced => {
                return Err(HostError::Other("host is already started".into()));
            },
            Phase::Stopping | Phase::Stopped => {
                return Err(HostError::Other("host has been stopped".into()));
            },
        }

        self.mux
            .start()
            .await
            .map_err(|err| HostError::Other(err.to_string()))?;

        let peers = self.options.materialize_peer_config();
        tracing::debug!(
            persistent_peers = peers.persistent_peers.len(),
            private_peer_ids = peers.private_peer_ids.len(),
            unconditional_peer_ids = peers.unconditional_peer_ids.len(),
            sentry = self.options.is_sentry(),
            "materialized engine peer graph"
        );
        let engine_node = self
            .engine_factory
            .build(&self.genesis, &self.options, &peers)
            .await
            .map_err(|err| HostError::Other(err.to_string()))?;
        let engine_client = engine_node.client();
        engine_node
            .start()
            .await
            .map_err(|err| HostError::Other(err.to_string()))?;

        let _ = self.engine_node.set(engine_node.clone());
        let _ = self.engine_client.set(engine_client.clone());
        let _ = self.submission.set(Arc::new(SubmissionManager::new(
            engine_client.clone(),
            self.mux.clone(),
            self.started_signal.clone(),
            self.subscriber_ids.clone(),
        )));

        self.services.start();

        {
            let mut workers = self.background_workers.lock();
            workers.push(sync::spawn_worker(
                engine_client.clone(),
                self.mux.clone(),
                self.synced_signal.clone(),
            ));
            workers.push(notifier::spawn_worker(
                engine_client.clone(),
                self.notifier.clone(),
                self.subscriber_ids.clone(),
            ));
            workers.push(self.failure_monitor.spawn(engine_node.clone()));
            if self.options.metrics_enabled {
                workers.push(metrics::spawn_worker(engine_client.clone(), self.mux.clone()));
            }
            workers.push(self.spawn_synced_phase_watcher());
        }

        *phase = Phase::Started;
        self.started_signal.fire();
        Ok(())
    }

    /// Promotes `phase` from `Started` to `Synced` once C5 closes
    /// `synced-signal` (§3 "`Started → Synced` when C5 emits").
    fn spawn_synced_phase_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            this.synced_signal.wait().await;
            let mut phase = this.phase.lock().await;
            if *phase == Phase::Started {
                *phase = Phase::Synced;
            }
        })
    }

    /// Phase E. Safe to call only after `start`.
    pub async fn stop(self: &Arc<Self>) -> HostResult<()> {
        {
            let mut phase = self.phase.lock().await;
            match *phase {
                Phase::Started | Phase::Synced => {},
                _ => return Err(HostError::Other("stop is only valid after start".into())),
            }
            *phase = Phase::Stopping;
        }

        self.failure_monitor.mark_clean_shutdown();
        if let Some(node) = self.engine_node.get() {
            node.stop().await;
        }
        self.services.stop().await;
        self.mux.stop().await;
        if let Some(node) = self.engine_node.get() {
            node.wait_termination().await;
        }

        for hook in self.halt_hooks.lock().drain(..) {
            hook();
        }

        *self.phase.lock().await = Phase::Stopped;
        self.quit_signal.fire();
        Ok(())
    }

    /// Drains the background-worker handles that are not part of the
    /// service dispatcher's own wait group (§4.6).
    pub async fn cleanup(&self) {
        let handles = std::mem::take(&mut *self.background_workers.lock());
        for handle in handles {
            handle.abort();
        }
        if let Some(ticker) = self.epoch_ticker.lock().take() {
            ticker.abort();
        }
    }

    /// Resolves once `Stop` has completed (§8 scenario 5: "`Quit()` closes").
    pub async fn quit(&self) {
        self.quit_signal.wait().await;
    }

    pub fn started(&self) -> bool {
        self.started_signal.is_fired()
    }

    pub fn synced(&self) -> bool {
        self.synced_signal.is_fired()
    }

    pub fn supported_features(&self) -> Vec<&'static str> {
        let mut features = vec!["submit-tx", "watch-blocks", "state-to-genesis"];
        if self.options.is_sentry() {
            features.push("sentry");
        }
        if self.options.state_sync_configured() {
            features.push("state-sync");
        }
        if self.options.metrics_enabled {
            features.push("metrics");
        }
        features
    }

    // ---- Submission (§4.4, §6) ----

    /// Blocks on `started-signal` before delegating, so a caller that
    /// invokes this before `start()` has even run still gets the
    /// documented "subscribe, don't fail fast" behaviour (§3 invariant 3)
    /// rather than an error about a nonexistent submission manager.
    pub async fn submit_tx(&self, ctx: &CancellationToken, signed: Vec<u8>) -> HostResult<()> {
        tokio::select! {
            _ = self.started_signal.wait() => {},
            () = ctx.cancelled() => return Err(HostError::Canceled),
        }
        if let Some(handler) = self.auth_handler.read().clone() {
            if !handler(&signed) {
                return Err(HostError::Other("rejected by transaction auth handler".into()));
            }
        }
        let submission = self
            .submission
            .get()
            .expect("submission manager is set before started-signal fires");
        submission.submit_tx(ctx, signed).await
    }

    pub async fn submit_evidence(&self, ctx: &CancellationToken, evidence: Vec<u8>) -> HostResult<()> {
        tokio::select! {
            _ = self.started_signal.wait() => {},
            () = ctx.cancelled() => return Err(HostError::Canceled),
        }
        let submission = self
            .submission
            .get()
            .expect("submission manager is set before started-signal fires");
        submission.submit_evidence(evidence).await
    }

    pub async fn estimate_gas(&self, signer: &[u8], tx: &[u8]) -> HostResult<u64> {
        self.mux
            .estimate_gas(signer, tx)
            .await
            .map_err(|err| HostError::Other(err.to_string()))
    }

    pub async fn get_signer_nonce(&self, signer: &[u8]) -> HostResult<u64> {
        self.mux
            .signer_nonce(signer)
            .await
            .map_err(|err| HostError::Other(err.to_string()))
    }

    // ---- Queries (§4.7 "Queries", §6) ----

    /// `height = None` means `HeightLatest`, resolved against the **mux's**
    /// notion of height, not the engine's (§4.7 "the single most important
    /// read invariant").
    pub async fn get_block(&self, height: Option<u64>) -> HostResult<Block> {
        let height = self.resolve_height(height).await?;
        self.mux.get_block(height).await.ok_or(HostError::NoCommittedBlocks)
    }

    pub async fn get_transactions(&self, height: Option<u64>) -> HostResult<Vec<Vec<u8>>> {
        let height = self.resolve_height(height).await?;
        self.mux
            .get_transactions(height)
            .await
            .ok_or(HostError::NoCommittedBlocks)
    }

    pub async fn get_transactions_with_results(
        &self,
        height: Option<u64>,
    ) -> HostResult<Vec<TxResult>> {
        let height = self.resolve_height(height).await?;
        self.mux
            .get_transaction_results(height)
            .await
            .ok_or(HostError::NoCommittedBlocks)
    }

    pub async fn get_unconfirmed_transactions(&self) -> HostResult<Vec<Vec<u8>>> {
        let client = self.require_engine_client()?;
        Ok(client.unconfirmed_txs().await)
    }

    async fn resolve_height(&self, height: Option<u64>) -> HostResult<u64> {
        match height {
            Some(h) => Ok(h),
            None => {
                let latest = self.mux.block_height().await;
                if latest == 0 {
                    Err(HostError::NoCommittedBlocks)
                } else {
                    Ok(latest)
                }
            },
        }
    }

    pub fn get_last_retained_version(&self) -> u64 {
        self.genesis.initial_height
    }

    pub async fn get_status(&self) -> HostResult<Status> {
        let latest_height = self.mux.block_height().await;
        let latest_block = if latest_height == 0 {
            None
        } else {
            self.mux.get_block(latest_height).await
        };
        let peers = match self.engine_client.get() {
            Some(client) => client.peer_count().await,
            None => 0,
        };
        let is_validator = self
            .state
            .is_validator(&self.identity.consensus_key, latest_height + 1)
            .await;

        Ok(Status {
            genesis_hash: content_hash(&serde_json::to_vec(&self.genesis).unwrap_or_default()),
            genesis_height: self.genesis.initial_height,
            last_retained_height: self.get_last_retained_version(),
            latest_block,
            peers,
            is_validator,
        })
    }

    pub async fn get_epoch(&self) -> HostResult<u64> {
        match &self.epoch_time {
            Some(backend) => Ok(backend.epoch().await),
            None => Err(HostError::Unsupported("epoch-time".into())),
        }
    }

    pub async fn wait_epoch(&self, epoch: u64, ctx: CancellationToken) -> HostResult<()> {
        match &self.epoch_time {
            Some(backend) => backend.wait_epoch(epoch, ctx).await,
            None => Err(HostError::Unsupported("epoch-time".into())),
        }
    }

    /// Per §4.7: merges per-domain genesis sections carried over from the
    /// initial genesis document with chain-id/halt-epoch/consensus
    /// sections. Per-domain state snapshots at arbitrary pinned heights are
    /// produced by the (out-of-scope) ABCI reducer; this crate reproduces
    /// the genesis-declared sections, which is sufficient for the
    /// round-trip law in §8 (re-serializing reproduces the same sections).
    pub fn state_to_genesis(&self, _height: u64) -> GenesisSnapshot {
        GenesisSnapshot {
            chain_id: self.genesis.chain_id.clone(),
            halt_epoch: self.genesis.halt_epoch,
            consensus_params: ConsensusParamsSnapshot::from(&self.genesis.consensus_params),
            domains: self.genesis.domains.clone(),
        }
    }

    pub fn get_genesis_document(&self) -> &Genesis {
        &self.genesis
    }

    /// Own network-reachable addresses. No real transport is modeled here;
    /// the host exposes a hex encoding of its p2p identity as a stand-in
    /// (an Open Question resolution, see `DESIGN.md`).
    pub fn get_addresses(&self) -> Vec<String> {
        vec![hex::encode(&self.identity.p2p_key)]
    }

    pub fn consensus_key(&self) -> PublicKeyBytes {
        self.identity.consensus_key.clone()
    }

    pub fn watch_blocks(&self) -> async_broadcast::Receiver<Block> {
        self.notifier.watch()
    }

    // ---- Extension points (§6) ----

    /// Must be called before `start()` (§3 invariant 1).
    pub async fn register_application(&self, name: String) -> HostResult<()> {
        {
            let phase = self.phase.lock().await;
            if *phase != Phase::Initialized {
                return Err(HostError::Other(
                    "applications must be registered before start".into(),
                ));
            }
        }
        self.mux
            .register_application(name)
            .await
            .map_err(|err| HostError::Other(err.to_string()))
    }

    pub fn set_transaction_auth_handler(&self, handler: Arc<AuthHandler>) {
        *self.auth_handler.write() = Some(handler);
    }

    pub fn register_halt_hook(&self, hook: Box<HaltHook>) {
        self.halt_hooks.lock().push(hook);
    }

    pub fn pubkey_blacklist(&self) -> Vec<PublicKeyBytes> {
        self.blacklist.read().clone()
    }

    fn require_engine_client(&self) -> HostResult<Arc<dyn EngineClient>> {
        self.engine_client
            .get()
            .cloned()
            .ok_or_else(|| HostError::Other("host is not started".into()))
    }
}

/// Assembled view for `GetStatus` (§4.7).
#[derive(Clone, Debug)]
pub struct Status {
    pub genesis_hash: Vec<u8>,
    pub genesis_height: u64,
    pub last_retained_height: u64,
    pub latest_block: Option<Block>,
    pub peers: usize,
    pub is_validator: bool,
}
