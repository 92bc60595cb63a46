//! Typed error surface for the host API (§7).
//!
//! Internal plumbing (genesis loading, engine construction, I/O) bubbles
//! `anyhow::Error` the way the rest of this workspace does; this enum is the
//! boundary type callers of the host API pattern-match on.

use thiserror::Error;

/// A domain error reconstructed from an application multiplexer's
/// `(codespace, code, log)` triple (§4.4 step 4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{codespace}: code {code}: {log}")]
pub struct DomainError {
    pub codespace: String,
    pub code: u32,
    pub log: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Asked for a block before one exists.
    #[error("no committed blocks")]
    NoCommittedBlocks,

    /// Transaction already present in, or recently evicted from, the mempool.
    #[error("duplicate transaction")]
    DuplicateTx,

    /// Requested domain backend is not available on this host.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Evidence failed to unmarshal or convert.
    #[error("malformed evidence: {0}")]
    MalformedEvidence(String),

    /// Caller or host context cancelled; also used for the sentinel
    /// "no error, nil subscription" the engine returns during shutdown.
    #[error("canceled")]
    Canceled,

    /// Reconstructed application-level error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A transaction was evicted from the mempool by the application
    /// multiplexer's invalidation watch while `SubmitTx` was waiting on it.
    #[error("transaction invalidated: {0}")]
    Invalidated(String),

    /// Catch-all for errors that don't reconstruct into a `DomainError`
    /// (step 4: "if reconstruction yields no mapping, fail with a plain
    /// error bearing `log`").
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Build the `CheckTx`/event-result failure path of §4.4 step 4 and step 5(a):
    /// reconstruct a `DomainError` from `(codespace, code, log)`, falling back to
    /// `Other(log)` when the codespace/code pair carries no recognized mapping.
    pub fn from_result(codespace: &str, code: u32, log: &str) -> Self {
        if codespace.is_empty() {
            HostError::Other(log.to_string())
        } else {
            HostError::Domain(DomainError {
                codespace: codespace.to_string(),
                code,
                log: log.to_string(),
            })
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
