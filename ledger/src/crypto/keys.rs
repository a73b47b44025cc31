//! # Key Material & Rotation
//!
//! Ed25519 signing keys for the ledger, plus the rotation machinery that
//! retires them on schedule.
//!
//! ## Why Ed25519?
//!
//! - 128-bit security level — the same margin the "use at least RSA-3072"
//!   guidance is aiming for, in 32+32 bytes instead of kilobytes.
//! - Deterministic signing with no nonce management, and strongly
//!   non-malleable under ed25519-dalek's strict verification. That is the
//!   property randomized PSS padding exists to buy on the RSA side; here
//!   it comes with the scheme.
//! - Signing is microseconds, which matters when a sensor feed signs every
//!   reading.
//!
//! ## Rotation & retention
//!
//! Exactly one [`KeyMaterial`] is active at a time. Rotation generates a
//! fresh keypair, pushes the outgoing public key into a bounded ring of
//! retired generations, and bumps the generation counter. Signatures
//! remain verifiable for as long as their generation stays in the ring;
//! beyond that window verification reports failure rather than trusting
//! whatever public key a transaction happens to carry.
//!
//! Private key material for retired generations is dropped immediately —
//! old keys can verify but never sign again. Key bytes are never logged.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors from key handling. Vague on purpose — error messages that
/// describe key material in detail are a gift to attackers.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("public key export failed")]
    ExportFailed,
}

/// The active signing identity of a ledger process.
///
/// Deliberately does NOT implement `Serialize`/`Clone` for the private
/// half. Persisting a signing key should be a conscious act elsewhere,
/// not a side effect of shoving this struct somewhere serializable.
pub struct KeyMaterial {
    signing_key: SigningKey,

    /// Monotonic rotation counter, starting at 0 for the key generated at
    /// construction. Recorded on every transaction so verification can
    /// check the signer against the right generation.
    pub generation: u64,

    /// When this material was generated. Drives rotation scheduling.
    pub generated_at: Instant,
}

impl KeyMaterial {
    /// Generates fresh material from the OS CSPRNG.
    pub fn generate(generation: u64) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            generation,
            generated_at: Instant::now(),
        }
    }

    /// Hex encoding of the public (verifying) key. Safe to share, log,
    /// or embed in transactions.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs a message, returning the 64-byte signature as hex.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }

    /// SPKI PEM encoding of the public key, for external verifiers.
    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| KeyError::ExportFailed)
    }
}

/// A signature bundle as recorded on a transaction: the signature itself
/// plus enough context to verify it after the signing key has rotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Hex-encoded Ed25519 signature.
    pub signature: String,
    /// Hex-encoded public key of the generation that signed.
    pub public_key: String,
    /// Generation counter at signing time.
    pub generation: u64,
}

/// A retired public key kept around for verifying historical signatures.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    pub public_key_hex: String,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// KeyRing
// ---------------------------------------------------------------------------

/// Active key material plus a bounded ring of retired public keys.
///
/// The ring itself is not thread-safe; the engine wraps it in a single
/// `RwLock` so rotation is mutually exclusive with in-flight sign and
/// verify operations. A verify that starts just before rotation completes
/// against a consistent view of the ring.
pub struct KeyRing {
    active: KeyMaterial,
    retired: VecDeque<RetiredKey>,
    retain: usize,
    last_rotation: Instant,
}

impl KeyRing {
    /// Creates a ring with freshly generated generation-0 material.
    pub fn new(retain: usize) -> Self {
        Self {
            active: KeyMaterial::generate(0),
            retired: VecDeque::with_capacity(retain),
            retain,
            last_rotation: Instant::now(),
        }
    }

    /// Signs a message with the active key and returns the full envelope.
    pub fn sign(&self, message: &[u8]) -> SignedEnvelope {
        SignedEnvelope {
            signature: self.active.sign_hex(message),
            public_key: self.active.public_key_hex(),
            generation: self.active.generation,
        }
    }

    /// Swaps in fresh key material and retires the outgoing public key.
    /// Returns the retired public key (hex) so dependents can keep
    /// verifying signatures already issued under it.
    pub fn rotate(&mut self) -> String {
        let old_public = self.active.public_key_hex();
        let old_generation = self.active.generation;

        self.active = KeyMaterial::generate(old_generation + 1);
        self.last_rotation = Instant::now();

        self.retired.push_back(RetiredKey {
            public_key_hex: old_public.clone(),
            generation: old_generation,
        });
        while self.retired.len() > self.retain {
            self.retired.pop_front();
        }

        old_public
    }

    /// True once the rotation period has elapsed since the last rotation
    /// (or since construction, for generation 0).
    pub fn rotation_due(&self, period: Duration) -> bool {
        self.last_rotation.elapsed() >= period
    }

    /// True if the given hex public key is the active key or a retained
    /// retired generation. Anything else — including a formerly valid key
    /// that aged out of the ring — is untrusted.
    pub fn is_trusted(&self, public_key_hex: &str) -> bool {
        if self.active.public_key_hex() == public_key_hex {
            return true;
        }
        self.retired
            .iter()
            .any(|k| k.public_key_hex == public_key_hex)
    }

    /// Hex public key of the active generation.
    pub fn active_public_key_hex(&self) -> String {
        self.active.public_key_hex()
    }

    /// Active generation counter.
    pub fn generation(&self) -> u64 {
        self.active.generation
    }

    /// SPKI PEM of the active public key.
    pub fn active_public_key_pem(&self) -> Result<String, KeyError> {
        self.active.public_key_pem()
    }

    /// Retired generations currently retained, oldest first.
    pub fn retired(&self) -> impl Iterator<Item = &RetiredKey> {
        self.retired.iter()
    }
}

/// Parses an SPKI PEM public key (as produced by
/// [`KeyMaterial::public_key_pem`]) back into the hex form used throughout
/// the ledger. The inverse of export, for wiring external verifiers.
pub fn public_key_hex_from_pem(pem: &str) -> Result<String, KeyError> {
    let key = VerifyingKey::from_public_key_pem(pem).map_err(|_| KeyError::InvalidPublicKey)?;
    Ok(hex::encode(key.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_signs_and_exposes_public_key() {
        let material = KeyMaterial::generate(0);
        assert_eq!(material.public_key_hex().len(), 64);
        assert_eq!(material.sign_hex(b"hello").len(), 128);
    }

    #[test]
    fn rotation_advances_generation_and_retires_old_key() {
        let mut ring = KeyRing::new(3);
        let gen0_key = ring.active_public_key_hex();

        let retired = ring.rotate();
        assert_eq!(retired, gen0_key);
        assert_eq!(ring.generation(), 1);
        assert_ne!(ring.active_public_key_hex(), gen0_key);
        assert!(ring.is_trusted(&gen0_key));
    }

    #[test]
    fn retention_window_is_bounded() {
        let mut ring = KeyRing::new(2);
        let gen0_key = ring.active_public_key_hex();

        ring.rotate(); // retires gen 0
        ring.rotate(); // retires gen 1
        assert!(ring.is_trusted(&gen0_key));

        ring.rotate(); // retires gen 2, evicts gen 0
        assert!(!ring.is_trusted(&gen0_key));
        assert_eq!(ring.retired().count(), 2);
    }

    #[test]
    fn unknown_keys_are_untrusted() {
        let ring = KeyRing::new(3);
        let stranger = KeyMaterial::generate(0);
        assert!(!ring.is_trusted(&stranger.public_key_hex()));
        assert!(!ring.is_trusted("definitely not a key"));
    }

    #[test]
    fn rotation_due_respects_period() {
        let ring = KeyRing::new(3);
        assert!(ring.rotation_due(Duration::ZERO));
        assert!(!ring.rotation_due(Duration::from_secs(3600)));
    }

    #[test]
    fn pem_export_round_trips() {
        let ring = KeyRing::new(3);
        let pem = ring.active_public_key_pem().unwrap();
        assert!(pem.contains("BEGIN PUBLIC KEY"));

        let hex_back = public_key_hex_from_pem(&pem).unwrap();
        assert_eq!(hex_back, ring.active_public_key_hex());
    }

    #[test]
    fn pem_import_rejects_garbage() {
        assert!(public_key_hex_from_pem("-----BEGIN JUNK-----\nAAAA\n-----END JUNK-----").is_err());
        assert!(public_key_hex_from_pem("").is_err());
    }
}
