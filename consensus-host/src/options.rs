//! Recognized configuration options (§6).

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum PruneStrategy {
    #[default]
    Nothing,
    KeepN,
}

#[derive(Parser, Clone, Debug)]
pub struct Options {
    /// Host data directory; the engine's own directory is created beneath it.
    #[clap(long, env = "CONSENSUS_HOST_DATA_DIR")]
    pub data_dir: PathBuf,

    // -- abci.prune.* --
    #[clap(long = "abci.prune.strategy", env = "CONSENSUS_HOST_ABCI_PRUNE_STRATEGY", value_enum, default_value_t = PruneStrategy::Nothing)]
    pub abci_prune_strategy: PruneStrategy,
    #[clap(long = "abci.prune.num_kept", env = "CONSENSUS_HOST_ABCI_PRUNE_NUM_KEPT", default_value_t = 3600)]
    pub abci_prune_num_kept: u64,

    // -- checkpointer.* --
    #[clap(long = "checkpointer.disabled", env = "CONSENSUS_HOST_CHECKPOINTER_DISABLED")]
    pub checkpointer_disabled: bool,
    #[clap(long = "checkpointer.check_interval", env = "CONSENSUS_HOST_CHECKPOINTER_CHECK_INTERVAL", value_parser = parse_duration_secs, default_value = "120")]
    pub checkpointer_check_interval: Duration,

    // -- sentry.* --
    #[clap(long = "sentry.upstream_address", env = "CONSENSUS_HOST_SENTRY_UPSTREAM_ADDRESS", value_delimiter = ',')]
    pub sentry_upstream_address: Vec<String>,

    // -- p2p.* --
    #[clap(long = "p2p.persistent_peer", env = "CONSENSUS_HOST_P2P_PERSISTENT_PEER", value_delimiter = ',')]
    pub p2p_persistent_peer: Vec<String>,
    #[clap(long = "p2p.persistent_peers_max_dial_period", env = "CONSENSUS_HOST_P2P_PERSISTENT_PEERS_MAX_DIAL_PERIOD", value_parser = parse_duration_secs, default_value = "0")]
    pub p2p_persistent_peers_max_dial_period: Duration,
    #[clap(long = "p2p.unconditional_peer_ids", env = "CONSENSUS_HOST_P2P_UNCONDITIONAL_PEER_IDS", value_delimiter = ',')]
    pub p2p_unconditional_peer_ids: Vec<String>,
    #[clap(long = "p2p.disable_peer_exchange", env = "CONSENSUS_HOST_P2P_DISABLE_PEER_EXCHANGE")]
    pub p2p_disable_peer_exchange: bool,

    /// Floor gas price for mempool admission.
    #[clap(long, env = "CONSENSUS_HOST_MIN_GAS_PRICE", default_value_t = 0)]
    pub min_gas_price: u64,

    // -- debug.* (honored only when `debug_allow_unsafe` is set) --
    #[clap(long = "debug.allow_unsafe", env = "CONSENSUS_HOST_DEBUG_ALLOW_UNSAFE")]
    pub debug_allow_unsafe: bool,
    #[clap(long = "debug.disable_check_tx", env = "CONSENSUS_HOST_DEBUG_DISABLE_CHECK_TX")]
    pub debug_disable_check_tx: bool,
    #[clap(
        long = "debug.unsafe_replay_recover_corrupted_wal",
        env = "CONSENSUS_HOST_DEBUG_UNSAFE_REPLAY_RECOVER_CORRUPTED_WAL"
    )]
    pub debug_unsafe_replay_recover_corrupted_wal: bool,

    // -- supplementarysanity.* --
    #[clap(long = "supplementarysanity.enabled", env = "CONSENSUS_HOST_SUPPLEMENTARYSANITY_ENABLED")]
    pub supplementarysanity_enabled: bool,
    #[clap(long = "supplementarysanity.interval", env = "CONSENSUS_HOST_SUPPLEMENTARYSANITY_INTERVAL", value_parser = parse_duration_secs, default_value = "60")]
    pub supplementarysanity_interval: Duration,

    // -- state_sync.* --
    #[clap(long = "state_sync.enabled", env = "CONSENSUS_HOST_STATE_SYNC_ENABLED")]
    pub state_sync_enabled: bool,
    #[clap(long = "state_sync.consensus_node", env = "CONSENSUS_HOST_STATE_SYNC_CONSENSUS_NODE", value_delimiter = ',')]
    pub state_sync_consensus_node: Vec<Url>,
    #[clap(long = "state_sync.trust_period", env = "CONSENSUS_HOST_STATE_SYNC_TRUST_PERIOD", value_parser = parse_duration_secs, default_value = "604800")]
    pub state_sync_trust_period: Duration,
    #[clap(long = "state_sync.trust_height", env = "CONSENSUS_HOST_STATE_SYNC_TRUST_HEIGHT", default_value_t = 0)]
    pub state_sync_trust_height: u64,
    #[clap(long = "state_sync.trust_hash", env = "CONSENSUS_HOST_STATE_SYNC_TRUST_HASH", default_value = "")]
    pub state_sync_trust_hash: String,

    /// Spawn the metrics worker (ambient; §1.1).
    #[clap(long = "metrics.enabled", env = "CONSENSUS_HOST_METRICS_ENABLED")]
    pub metrics_enabled: bool,

    #[clap(flatten)]
    pub logging: consensus_host_utils::logging::Config,
}

impl Options {
    /// Whether we are configured to run as a sentry fronting an upstream
    /// validator (§4.7 Phase C step 4).
    pub fn is_sentry(&self) -> bool {
        !self.sentry_upstream_address.is_empty()
    }

    pub fn state_sync_configured(&self) -> bool {
        self.state_sync_enabled && !self.state_sync_consensus_node.is_empty()
    }

    /// Materializes the engine's peer graph from `p2p.*`/`sentry.*` options
    /// (§4.7 Phase C steps 3-4). All peer identifiers are lowercased because
    /// the engine matches them byte-exact and case-sensitive (§9 "Peer-id
    /// case sensitivity"); this is a wire compatibility requirement, not a
    /// local style choice. When running as a sentry, each upstream address
    /// is appended to `persistent_peers` and its bare id (the part before
    /// `@`) is appended to both `private_peer_ids` and `unconditional_peer_ids`.
    pub fn materialize_peer_config(&self) -> PeerConfig {
        let mut persistent_peers: Vec<String> = self
            .p2p_persistent_peer
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        let mut unconditional_peer_ids: Vec<String> = self
            .p2p_unconditional_peer_ids
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        let mut private_peer_ids: Vec<String> = Vec::new();

        for upstream in &self.sentry_upstream_address {
            let address = upstream.to_lowercase();
            let id = bare_peer_id(&address);
            persistent_peers.push(address);
            private_peer_ids.push(id.clone());
            unconditional_peer_ids.push(id);
        }

        PeerConfig {
            persistent_peers,
            unconditional_peer_ids,
            private_peer_ids,
            max_dial_period: self.p2p_persistent_peers_max_dial_period,
            disable_peer_exchange: self.p2p_disable_peer_exchange,
        }
    }
}

/// A peer address is `id@host:port`; the bare id is everything before `@`.
fn bare_peer_id(address: &str) -> String {
    address.split('@').next().unwrap_or(address).to_string()
}

/// The engine's peer graph as materialized by [`Options::materialize_peer_config`].
/// Handed to an `EngineFactory` alongside the genesis/options the engine
/// itself also consumes (§4.7 Phase C step 3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub persistent_peers: Vec<String>,
    pub unconditional_peer_ids: Vec<String>,
    pub private_peer_ids: Vec<String>,
    pub max_dial_period: Duration,
    pub disable_peer_exchange: bool,
}

fn parse_duration_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_secs(s.parse()?))
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_options() -> Options {
        Options {
            data_dir: PathBuf::from("/tmp/consensus-host-options-test"),
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

    #[test]
    fn peer_identifiers_are_lowercased() {
        let mut options = base_options();
        options.p2p_persistent_peer = vec!["ABCDEF@10.0.0.1:26656".to_string()];
        options.p2p_unconditional_peer_ids = vec!["DEADBEEF".to_string()];

        let peers = options.materialize_peer_config();
        assert_eq!(peers.persistent_peers, vec!["abcdef@10.0.0.1:26656"]);
        assert_eq!(peers.unconditional_peer_ids, vec!["deadbeef"]);
    }

    #[test]
    fn sentry_upstream_addresses_become_private_and_unconditional_peers() {
        let mut options = base_options();
        options.sentry_upstream_address = vec!["CAFE1234@validator.example:26656".to_string()];

        let peers = options.materialize_peer_config();
        assert_eq!(peers.persistent_peers, vec!["cafe1234@validator.example:26656"]);
        assert_eq!(peers.private_peer_ids, vec!["cafe1234"]);
        assert_eq!(peers.unconditional_peer_ids, vec!["cafe1234"]);
    }

    #[test]
    fn non_sentry_options_materialize_an_empty_peer_graph() {
        let peers = base_options().materialize_peer_config();
        assert!(peers.persistent_peers.is_empty());
        assert!(peers.private_peer_ids.is_empty());
        assert!(peers.unconditional_peer_ids.is_empty());
    }
}
