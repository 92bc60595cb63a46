//! Full-node consensus host: embeds a BFT replicated state-machine engine
//! and exposes the replicated ledger to domain subsystems (beacon,
//! epoch-time, registry, staking, scheduler, key-manager, root-hash).
//!
//! The BFT engine and the application multiplexer are modeled as trait
//! boundaries ([`engine`], [`mux`]) rather than implemented here; see
//! [`testing`] for an in-memory pair used by this crate's own tests, and
//! [`host`] for the lifecycle orchestrator that ties everything together.

pub mod engine;
pub mod epoch;
pub mod errors;
pub mod failure_monitor;
pub mod genesis;
pub mod host;
pub mod metrics;
pub mod mux;
pub mod notifier;
pub mod options;
pub mod pubsub;
pub mod services;
pub mod signal;
pub mod submission;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::{HostError, HostResult};
pub use host::Host;
