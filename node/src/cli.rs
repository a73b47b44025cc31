//! # CLI Interface
//!
//! Command-line argument structure for `orchard-node` using `clap` derive.
//! Three subcommands: `run`, `keygen`, and `version`.

use clap::{Parser, Subcommand};

/// Orchard event-ledger node.
///
/// Hosts the cryptographically-secured event ledger: runs the retry and
/// key-rotation workers, records demo telemetry, and exposes the active
/// public key for external verifiers.
#[derive(Parser, Debug)]
#[command(
    name = "orchard-node",
    about = "Orchard event-ledger node",
    version,
    propagate_version = true
)]
pub struct OrchardCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a local-mode ledger with background workers and a demo
    /// telemetry feed. Stops cleanly on Ctrl-C.
    Run(RunArgs),
    /// Generate fresh key material and print the public key as PEM.
    Keygen,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Milliseconds between demo sensor readings.
    #[arg(long, env = "ORCHARD_FEED_INTERVAL_MS", default_value_t = 1000)]
    pub feed_interval_ms: u64,

    /// Sensor readings buffered before a batch flush (0 or 1 disables
    /// batching).
    #[arg(long, env = "ORCHARD_BATCH_SIZE", default_value_t = 16)]
    pub batch_size: usize,

    /// Local cache TTL in seconds.
    #[arg(long, env = "ORCHARD_CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    /// Retry worker interval in seconds.
    #[arg(long, env = "ORCHARD_RETRY_INTERVAL_SECS", default_value_t = 30)]
    pub retry_interval_secs: u64,

    /// Operator secret for the field-encryption key.
    ///
    /// **Never pass this flag in production** — set the environment
    /// variable from a secret store instead.
    #[arg(long, env = "ORCHARD_FIELD_SECRET")]
    pub field_secret: Option<String>,

    /// Log format: "pretty" or "json".
    #[arg(long, env = "ORCHARD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "ORCHARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        OrchardCli::command().debug_assert();
    }
}
