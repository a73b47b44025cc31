//! # Remote Chain Seam
//!
//! The ledger works identically whether a remote blockchain network sits
//! behind it or not; the only difference is where step 4 of the recording
//! pipeline lands. That choice is made **once, at construction**, as a
//! [`LedgerMode`] — not re-discovered by sniffing an `Option` on every
//! call. Tests and deployments can force either mode deterministically.
//!
//! [`RemoteChainClient`] is the entire surface the ledger asks of a remote
//! network: submit a sealed transaction, say whether you're reachable.
//! Consensus, gas, wallets — somebody else's department.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::transaction::Transaction;

/// Whether the ledger stores authoritatively in-process or forwards to a
/// configured remote chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// The in-memory store is the system of record.
    Local,
    /// Sealed transactions are forwarded to a remote chain; the local
    /// store keeps a non-authoritative cache for queries.
    Remote,
}

impl fmt::Display for LedgerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Errors a remote submission can produce. All of them are recoverable
/// from the ledger's point of view: the transaction goes to the retry
/// queue, not into the void.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("remote chain unreachable: {0}")]
    Unreachable(String),

    #[error("remote chain rejected transaction: {0}")]
    Rejected(String),

    #[error("remote submission timed out after {0:?}")]
    Timeout(Duration),
}

/// The interface a remote blockchain integration must provide.
///
/// Implementations are expected to be cheap to call concurrently; the
/// ledger applies its own timeout around `submit`, so implementations
/// need not race their own clocks.
#[async_trait]
pub trait RemoteChainClient: Send + Sync {
    /// Submits a sealed transaction to the remote network.
    async fn submit(&self, transaction: &Transaction) -> Result<(), SubmissionError>;

    /// Best-effort reachability probe, surfaced through `get_status`.
    async fn is_connected(&self) -> bool;
}
