//! Reference binary: boots a [`consensus_host::Host`] over the in-memory
//! `engine`/`mux` pair from [`consensus_host::testing`].
//!
//! A production deployment supplies its own `EngineFactory`, `MuxFactory`,
//! and `ServiceClientFactory` wired to a real BFT engine and ABCI reducer;
//! this crate does not ship one (§1 "Out of scope"), so this binary only
//! builds behind the `testing` feature and exists to exercise the
//! lifecycle end-to-end against the same in-memory pair the integration
//! tests use.

use clap::Parser;
use consensus_host::{
    options::Options,
    testing::{sample_genesis, TestHostBuilder},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    options.logging.init();

    let builder = TestHostBuilder::new()
        .with_genesis(sample_genesis())
        .with_options(options);
    let ledger = builder.ledger();
    let host = builder.build().await?;

    host.start().await?;
    tracing::info!(backend = "memory", "consensus host started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    drop(ledger);
    host.stop().await?;
    host.cleanup().await;
    Ok(())
}
