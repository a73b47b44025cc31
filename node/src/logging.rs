//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with a configurable format and
//! environment-based filtering via `RUST_LOG`.
//!
//! Output goes to stderr so stdout stays clean for structured data (the
//! `run` subcommand prints its final status report as JSON on stdout).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output for local development.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Parses a format string: "json" or "pretty" (case-insensitive).
    /// Anything unrecognized falls back to `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initializes the global tracing subscriber. Call exactly once, early in
/// `main()` — a second call panics.
///
/// `RUST_LOG` overrides `default_level` when set, with the usual
/// `EnvFilter` directive syntax, e.g.
/// `RUST_LOG=orchard_node=debug,orchard_ledger=info`.
pub fn init(default_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        }
    }

    tracing::info!(?format, "logging initialized");
}
