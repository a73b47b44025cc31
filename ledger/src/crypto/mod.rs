//! # Cryptographic Engine
//!
//! Everything security-related in the ledger flows through this module:
//! transaction digests, signatures, Merkle roots, field encryption, and
//! the scheduled key rotation that retires signing keys before they get
//! comfortable.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **Ed25519** for signatures — fast, strict, nobody has broken it.
//! - **AES-256-GCM** for sealing sensitive fields — AEAD done right.
//! - **BLAKE3** for digests and Merkle trees — because we live in the future.
//! - **Argon2id** for the one password-derived key — memory-hard on purpose.
//!
//! Everything here is a thin, type-safe wrapper around audited
//! implementations. If you're tempted to optimize these functions, please
//! reconsider. Then reconsider again. Then go read about timing attacks
//! and come back when you've lost the urge.

pub mod cache;
pub mod encryption;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod signatures;

// Re-export the things people actually need so they don't have to memorize
// the module hierarchy.
pub use encryption::{is_sealed_value, open_value, seal_value, EncryptionError};
pub use hash::{empty_root_hex, merkle_root_hex, transaction_digest_hex};
pub use kdf::KdfError;
pub use keys::{KeyError, SignedEnvelope};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::info;

use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, LedgerConfig, MEMO_KEY_CONTEXT,
};
use cache::MemoCache;
use hash::keyed_digest;
use keys::KeyRing;

// ---------------------------------------------------------------------------
// CryptoEngine
// ---------------------------------------------------------------------------

/// The stateful cryptographic core of the ledger.
///
/// Holds the key ring (active material plus retained retired generations)
/// and a bounded memo cache for digest and Merkle computations. Always has
/// active key material after construction — there is no "uninitialized"
/// state to defend against.
///
/// Thread safety: the key ring sits behind a single `RwLock`, so rotation
/// (a writer) is mutually exclusive with in-flight sign/verify operations
/// (readers). The memo cache has its own internal lock.
pub struct CryptoEngine {
    ring: RwLock<KeyRing>,
    memo: MemoCache,
    rotation_period: Duration,
}

impl CryptoEngine {
    /// Creates an engine with freshly generated generation-0 key material.
    pub fn new(config: &LedgerConfig) -> Self {
        let engine = Self {
            ring: RwLock::new(KeyRing::new(config.retained_key_generations)),
            memo: MemoCache::new(config.memo_cache_capacity),
            rotation_period: config.key_rotation_period,
        };
        info!(
            generation = 0,
            retained = config.retained_key_generations,
            "crypto engine initialized with fresh key material"
        );
        engine
    }

    // -- digests ------------------------------------------------------------

    /// Content digest of `(kind, payload)` as lowercase hex. Memoized by a
    /// domain-separated digest of the canonical input, so repeated hashing
    /// of the same content costs one cache lookup.
    pub fn hash_transaction(&self, kind_wire_name: &str, payload: &Map<String, Value>) -> String {
        let canonical = hash::canonical_payload(payload);
        let memo_key = keyed_digest(
            MEMO_KEY_CONTEXT,
            &[b"tx", kind_wire_name.as_bytes(), &[0x00], &canonical],
        );
        self.memo.get_or_insert_with(memo_key, || {
            hash::transaction_digest_hex(kind_wire_name, payload)
        })
    }

    /// Merkle root over ordered hex leaf digests, memoized. Empty input
    /// returns the all-zero sentinel.
    pub fn merkle_root(&self, leaves: &[String]) -> String {
        if leaves.is_empty() {
            return hash::empty_root_hex();
        }
        let mut memo_input: Vec<&[u8]> = Vec::with_capacity(leaves.len() + 1);
        memo_input.push(b"merkle");
        for leaf in leaves {
            memo_input.push(leaf.as_bytes());
        }
        let memo_key = keyed_digest(MEMO_KEY_CONTEXT, &memo_input);
        self.memo
            .get_or_insert_with(memo_key, || hash::merkle_root_hex(leaves))
    }

    // -- signatures ---------------------------------------------------------

    /// Signs the canonical serialization of a payload with the active key.
    ///
    /// Not memoized, unlike the digests: a signature cache would need
    /// invalidation on every rotation, and Ed25519 signing costs
    /// microseconds. The bookkeeping would outweigh the work saved.
    pub fn sign_payload(&self, payload: &Map<String, Value>) -> SignedEnvelope {
        let canonical = hash::canonical_payload(payload);
        self.ring.read().sign(&canonical)
    }

    /// Verifies a payload signature. Returns `false` — never an error — for
    /// malformed input, a bad signature, or a signer key that is neither
    /// the active generation nor a retained retired one.
    pub fn verify_payload(
        &self,
        payload: &Map<String, Value>,
        signature_hex: &str,
        public_key_hex: &str,
    ) -> bool {
        // Hold the read lock across the trust check and the verify so a
        // concurrent rotation cannot retire the key mid-verification.
        let ring = self.ring.read();
        if !ring.is_trusted(public_key_hex) {
            return false;
        }
        let canonical = hash::canonical_payload(payload);
        signatures::verify_hex(public_key_hex, &canonical, signature_hex)
    }

    // -- symmetric encryption -----------------------------------------------

    /// Authenticated encryption with a fresh random nonce per call.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &[u8; AES_KEY_LENGTH],
    ) -> Result<(Vec<u8>, [u8; AES_NONCE_LENGTH]), EncryptionError> {
        encryption::seal(key, plaintext)
    }

    /// Authenticated decryption. Fails on any tag mismatch.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; AES_NONCE_LENGTH],
        key: &[u8; AES_KEY_LENGTH],
    ) -> Result<Vec<u8>, EncryptionError> {
        encryption::open(key, ciphertext, nonce)
    }

    /// Password-based key derivation (Argon2id). See [`kdf`].
    pub fn derive_key(&self, secret: &[u8], salt: &[u8]) -> Result<[u8; AES_KEY_LENGTH], KdfError> {
        kdf::derive_key(secret, salt)
    }

    // -- key lifecycle ------------------------------------------------------

    /// Rotates the signing key immediately. Returns the retired public key
    /// (hex) so dependents can keep verifying signatures issued under it.
    pub fn rotate_keys(&self) -> String {
        let mut ring = self.ring.write();
        let old = ring.rotate();
        info!(
            generation = ring.generation(),
            "signing key rotated"
        );
        old
    }

    /// Rotates only if the configured rotation period has elapsed.
    /// Returns the retired public key when a rotation happened.
    pub fn rotate_if_due(&self) -> Option<String> {
        // Cheap read-locked check first; take the write lock only when a
        // rotation is actually due, and re-check under it (another caller
        // may have rotated between the two locks).
        if !self.ring.read().rotation_due(self.rotation_period) {
            return None;
        }
        let mut ring = self.ring.write();
        if !ring.rotation_due(self.rotation_period) {
            return None;
        }
        let old = ring.rotate();
        info!(generation = ring.generation(), "scheduled key rotation");
        Some(old)
    }

    /// Hex public key of the active generation.
    pub fn active_public_key_hex(&self) -> String {
        self.ring.read().active_public_key_hex()
    }

    /// Active generation counter.
    pub fn active_generation(&self) -> u64 {
        self.ring.read().generation()
    }

    /// SPKI PEM of the active public key, for external verifiers.
    pub fn export_public_key_pem(&self) -> Result<String, KeyError> {
        self.ring.read().active_public_key_pem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> CryptoEngine {
        CryptoEngine::new(&LedgerConfig::default())
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let e = engine();
        let p = payload(json!({"sensor_id": "S1", "data": {"temperature": 4.0}}));
        assert_eq!(
            e.hash_transaction("sensor_reading", &p),
            e.hash_transaction("sensor_reading", &p)
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let e = engine();
        let p = payload(json!({"crate_id": "CRT-9", "analysis": {"score": 0.82}}));
        let envelope = e.sign_payload(&p);
        assert!(e.verify_payload(&p, &envelope.signature, &envelope.public_key));
    }

    #[test]
    fn verify_fails_for_mutated_payload() {
        let e = engine();
        let p = payload(json!({"crate_id": "CRT-9"}));
        let envelope = e.sign_payload(&p);

        let mutated = payload(json!({"crate_id": "CRT-10"}));
        assert!(!e.verify_payload(&mutated, &envelope.signature, &envelope.public_key));
    }

    #[test]
    fn verify_fails_for_foreign_key() {
        let e = engine();
        let other = engine();
        let p = payload(json!({"shipment_id": "SHIP-1"}));
        let envelope = other.sign_payload(&p);
        // Correct signature, but from a key this engine never issued.
        assert!(!e.verify_payload(&p, &envelope.signature, &envelope.public_key));
    }

    #[test]
    fn rotation_keeps_old_signatures_verifiable_within_window() {
        let e = engine();
        let p = payload(json!({"shipment_id": "SHIP-1", "status": "in_transit"}));
        let envelope = e.sign_payload(&p);

        let retired = e.rotate_keys();
        assert_eq!(retired, envelope.public_key);
        assert_ne!(e.active_public_key_hex(), envelope.public_key);
        assert!(e.verify_payload(&p, &envelope.signature, &envelope.public_key));
    }

    #[test]
    fn signatures_age_out_beyond_retention() {
        let config = LedgerConfig {
            retained_key_generations: 1,
            ..LedgerConfig::default()
        };
        let e = CryptoEngine::new(&config);
        let p = payload(json!({"quality": "A"}));
        let envelope = e.sign_payload(&p);

        e.rotate_keys();
        assert!(e.verify_payload(&p, &envelope.signature, &envelope.public_key));

        e.rotate_keys(); // generation 0 falls out of the ring
        assert!(!e.verify_payload(&p, &envelope.signature, &envelope.public_key));
    }

    #[test]
    fn rotate_if_due_respects_period() {
        let config = LedgerConfig {
            key_rotation_period: Duration::from_secs(3600),
            ..LedgerConfig::default()
        };
        let e = CryptoEngine::new(&config);
        assert!(e.rotate_if_due().is_none());
        assert_eq!(e.active_generation(), 0);

        let eager = LedgerConfig {
            key_rotation_period: Duration::ZERO,
            ..LedgerConfig::default()
        };
        let e = CryptoEngine::new(&eager);
        assert!(e.rotate_if_due().is_some());
        assert_eq!(e.active_generation(), 1);
    }

    #[test]
    fn merkle_root_empty_and_append_behaviour() {
        let e = engine();
        assert_eq!(e.merkle_root(&[]), empty_root_hex());

        let a = e.hash_transaction("sensor_reading", &payload(json!({"n": 1})));
        let b = e.hash_transaction("sensor_reading", &payload(json!({"n": 2})));

        let one = e.merkle_root(std::slice::from_ref(&a));
        let two = e.merkle_root(&[a.clone(), b.clone()]);
        assert_ne!(one, two);
        assert_eq!(two, e.merkle_root(&[a, b]));
    }

    #[test]
    fn pem_export_is_importable() {
        let e = engine();
        let pem = e.export_public_key_pem().unwrap();
        let hex_key = keys::public_key_hex_from_pem(&pem).unwrap();
        assert_eq!(hex_key, e.active_public_key_hex());
    }
}
