//! Tracing setup shared by every binary that embeds the consensus host.
//!
//! Mirrors the `#[clap(flatten)] logging: logging::Config` pattern used
//! throughout this workspace's binaries: callers parse `Config` as part of
//! their own `clap::Parser` struct and call `init()` once at the top of
//! `main`.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
pub struct Config {
    /// Log format: `compact` (human-readable) or `json` (structured).
    #[clap(long, env = "CONSENSUS_HOST_LOG_FORMAT", default_value = "compact")]
    pub format: LogFormat,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,consensus_host=debug`.
    #[clap(long, env = "CONSENSUS_HOST_LOG_FILTER", default_value = "info")]
    pub filter: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unrecognized log format `{other}`")),
        }
    }
}

impl Config {
    /// Install the global tracing subscriber. Safe to call at most once per process;
    /// subsequent calls are no-ops (matching `tracing_subscriber`'s own guard).
    pub fn init(&self) {
        let filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
        let installed = match self.format {
            LogFormat::Compact => subscriber.compact().try_init(),
            LogFormat::Json => subscriber.json().try_init(),
        };
        if let Err(err) = installed {
            tracing::debug!(%err, "tracing subscriber already installed");
        }
    }
}
