// Copyright (c) 2026 Verdant Systems. MIT License.
// See LICENSE for details.

//! # Orchard Ledger — Core Library
//!
//! A cryptographically-secured event ledger for fresh-produce supply
//! chains. Domain events — sensor readings, ripeness analyses, shipment
//! lifecycle changes, quality checks — go in; tamper-evident, optionally
//! field-encrypted, signed and Merkle-anchored transaction records come
//! out, with a content hash the caller can verify against forever (well,
//! for the configured retention window — forever is a strong word in key
//! management).
//!
//! ## Architecture
//!
//! The modules mirror the actual concerns of the ledger:
//!
//! - **crypto** — digests, signatures, field encryption, key rotation.
//!   Don't roll your own; we didn't either.
//! - **transaction** — the record vocabulary: kinds, sealed transactions,
//!   receipts, verification reports.
//! - **store** — in-memory TTL cache of sealed records with ordered
//!   queries.
//! - **retry** — bounded, backoff-gated retries with a dead-letter log.
//!   Failed submissions are parked, never vaporized.
//! - **remote** — the seam to an optional remote blockchain network.
//!   Local-only mode is a first-class citizen, not a degraded fallback.
//! - **service** — the orchestrator the domain actually talks to.
//! - **workers** — the retry and key-rotation background tasks, both
//!   cancellable because daemon loops without a shutdown path are leaks
//!   with extra steps.
//! - **config** — constants and the deployment knobs.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over performance (but signing is still microseconds).
//! 2. Verification never panics — malformed input is a `false`, not a
//!    crash.
//! 3. Every failure ends somewhere inspectable: the caller's receipt, the
//!    retry queue, or the dead-letter log.
//! 4. If it touches key material, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod remote;
pub mod retry;
pub mod service;
pub mod store;
pub mod transaction;
pub mod workers;

pub use config::LedgerConfig;
pub use remote::{LedgerMode, RemoteChainClient, SubmissionError};
pub use service::{LedgerError, LedgerService};
pub use transaction::{
    GeoPoint, LedgerReport, LedgerStatus, RecordReceipt, ReportFilter, ShipmentStatus,
    SubmissionPath, Transaction, TransactionKind, TransactionState, VerificationReport,
};
pub use workers::{spawn_workers, WorkerHandles};
