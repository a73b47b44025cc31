//! # Ledger Configuration & Constants
//!
//! Every magic number in the Orchard ledger lives here. If you're hardcoding
//! a constant somewhere else, you're doing it wrong and you owe the team
//! coffee.
//!
//! The cryptographic parameters are not tunable at runtime on purpose.
//! Changing a digest length or a nonce size in a deployed ledger invalidates
//! every hash already handed to a caller, so those are compile-time facts.
//! Operational knobs (TTLs, intervals, batch sizes) live in [`LedgerConfig`]
//! and can vary per deployment.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 — the signature scheme for every transaction the ledger seals.
/// 128-bit security level, the same margin as RSA-3072+, in 32+32 bytes.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Ed25519 public (verifying) key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes. If yours isn't, something
/// has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// BLAKE3 for transaction digests and Merkle trees. 256-bit output,
/// domain-separated per use via `derive_key` contexts.
pub const DIGEST_ALGORITHM: &str = "BLAKE3";

/// Digest output length in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// AES-256-GCM for sealing sensitive payload fields. 256-bit keys,
/// 96-bit nonces, 128-bit authentication tags.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Argon2id for deriving the field-encryption key from an operator secret.
/// Memory-hard, so an attacker with a rack of GPUs gains much less than
/// they would against an iterated hash.
pub const KDF_ALGORITHM: &str = "Argon2id";

/// Salt length for key derivation, in bytes. Fresh random salt per
/// derivation, never reused.
pub const KDF_SALT_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Domain Separation Contexts
// ---------------------------------------------------------------------------

/// BLAKE3 `derive_key` context for transaction content digests.
pub const TRANSACTION_DIGEST_CONTEXT: &str = "orchard-ledger v1 transaction";

/// BLAKE3 `derive_key` context for interior Merkle tree nodes.
pub const MERKLE_NODE_CONTEXT: &str = "orchard-ledger v1 merkle node";

/// BLAKE3 `derive_key` context for memo-cache keys. Cache keys must never
/// collide with real digests, so they get their own domain.
pub const MEMO_KEY_CONTEXT: &str = "orchard-ledger v1 memo key";

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Fixed-width ISO-8601 timestamp format with microsecond precision.
///
/// Every timestamp the ledger emits uses this exact format, which makes
/// lexicographic comparison equivalent to chronological comparison. The
/// report date filters depend on that property — do not "simplify" this
/// to a variable-precision format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

// ---------------------------------------------------------------------------
// Sensitive Field Detection
// ---------------------------------------------------------------------------

/// Substrings that mark a payload key as sensitive (case-insensitive).
/// Values under matching keys are sealed with AES-256-GCM before the
/// transaction is hashed or signed.
pub const SENSITIVE_KEY_MARKERS: &[&str] = &["password", "secret", "token", "key"];

// ---------------------------------------------------------------------------
// Operational Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for a ledger deployment.
///
/// Defaults are tuned for a single-warehouse pilot: hourly cache expiry,
/// weekly key rotation, half-minute retry cadence. Production deployments
/// will mostly want to touch `cache_ttl` and `sensor_batch_size`.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Maximum age of a locally cached transaction before the cleanup pass
    /// evicts it. Applies in both local and remote mode — in remote mode
    /// the local copy is a convenience cache, not the authoritative record.
    pub cache_ttl: Duration,

    /// How often the retry worker wakes to drain failed submissions.
    pub retry_interval: Duration,

    /// Maximum failed transactions resubmitted per retry-worker wakeup.
    /// Bounds the work done in one tick so a deep backlog cannot starve
    /// foreground `record_*` calls of the queue lock.
    pub retry_batch_size: usize,

    /// Retry attempts before a transaction is routed to the dead-letter
    /// log. Exhausted transactions are never silently dropped.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff. Attempt `n` waits
    /// `retry_backoff_base * 2^n` before becoming eligible again.
    pub retry_backoff_base: Duration,

    /// How long the active signing key lives before the rotation worker
    /// replaces it. The source deployment rotated weekly; no reason found
    /// to deviate.
    pub key_rotation_period: Duration,

    /// How often the rotation worker checks whether the rotation period
    /// has elapsed. Checking hourly against a weekly period is plenty.
    pub rotation_check_interval: Duration,

    /// Retired public-key generations kept for verifying historical
    /// signatures. Signatures older than this many rotations stop
    /// verifying — that is the documented retention window, not a bug.
    pub retained_key_generations: usize,

    /// Sensor readings buffered before a batch flush. Values of 0 or 1
    /// disable batching and submit every reading immediately.
    pub sensor_batch_size: usize,

    /// Upper bound on a single remote-chain submission. On expiry the
    /// submission is treated as failed and routed to the retry queue;
    /// the caller is never blocked indefinitely.
    pub remote_timeout: Duration,

    /// Entry capacity of the engine's hash/Merkle memo cache. Bounded and
    /// LRU-evicted — the unbounded process-wide caches of the original
    /// deployment are deliberately not reproduced.
    pub memo_cache_capacity: usize,

    /// Operator secret from which the field-encryption key is derived
    /// (once, at service construction). Replace in any real deployment;
    /// the default exists so devnet "just works".
    pub field_secret: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            retry_interval: Duration::from_secs(30),
            retry_batch_size: 32,
            max_retries: 5,
            retry_backoff_base: Duration::from_secs(2),
            key_rotation_period: Duration::from_secs(7 * 24 * 3600),
            rotation_check_interval: Duration::from_secs(3600),
            retained_key_generations: 3,
            sensor_batch_size: 16,
            remote_timeout: Duration::from_secs(10),
            memo_cache_capacity: 1024,
            field_secret: "orchard-devnet-field-secret".to_string(),
        }
    }
}
