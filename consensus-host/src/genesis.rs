//! The genesis document (§3, §4.7 Phase B/C).

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Opaque verification key bytes; the signature backend that interprets them
/// is out of scope for this crate.
pub type PublicKeyBytes = Vec<u8>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochTimeParams {
    pub interval: u64,
    /// Use a debug mock epoch-time backend instead of the real one.
    pub debug_mock_backend: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusParams {
    #[serde(with = "duration_millis")]
    pub timeout_commit: Duration,
    #[serde(with = "duration_millis")]
    pub empty_block_interval: Duration,
    pub skip_timeout_commit: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-domain genesis snapshot as captured at the pinned height for
/// `StateToGenesis`. The domain's own schema is out of scope here; we carry
/// it as an opaque, round-trippable JSON document.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainGenesis(pub serde_json::Value);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    /// Name of the consensus backend this genesis document declares
    /// (checked in `Host::new`, see §4.7 Phase A).
    pub consensus_backend: String,
    pub chain_id: String,
    pub initial_height: u64,
    pub halt_epoch: Option<u64>,
    pub epoch_time: EpochTimeParams,
    pub consensus_params: ConsensusParams,
    pub pubkey_blacklist: Vec<PublicKeyBytes>,
    /// Per-domain genesis sections carried over verbatim by `StateToGenesis`
    /// when no later snapshot has been taken yet.
    pub domains: BTreeMap<String, DomainGenesis>,
}

impl Genesis {
    /// Verify this genesis document declares the given consensus backend
    /// (§4.7 Phase A: "verify it declares this consensus backend").
    pub fn verify_backend(&self, expected: &str) -> anyhow::Result<()> {
        if self.consensus_backend != expected {
            anyhow::bail!(
                "genesis declares consensus backend `{}`, expected `{expected}`",
                self.consensus_backend
            );
        }
        Ok(())
    }
}

/// Chain-id, halt-epoch, and consensus sections plus per-domain snapshots
/// pinned at a height, as returned by `StateToGenesis` (§4.7).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenesisSnapshot {
    pub chain_id: String,
    pub halt_epoch: Option<u64>,
    pub consensus_params: ConsensusParamsSnapshot,
    pub domains: BTreeMap<String, DomainGenesis>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConsensusParamsSnapshot {
    pub timeout_commit_millis: u64,
    pub empty_block_interval_millis: u64,
    pub skip_timeout_commit: bool,
}

impl From<&ConsensusParams> for ConsensusParamsSnapshot {
    fn from(p: &ConsensusParams) -> Self {
        Self {
            timeout_commit_millis: p.timeout_commit.as_millis() as u64,
            empty_block_interval_millis: p.empty_block_interval.as_millis() as u64,
            skip_timeout_commit: p.skip_timeout_commit,
        }
    }
}
