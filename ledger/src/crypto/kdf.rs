//! # Password-Based Key Derivation
//!
//! Turns a low-entropy operator secret into a 256-bit AES key via Argon2id.
//! The ledger derives exactly one such key per process, at service
//! construction, and keeps it for the process lifetime — the KDF cost is
//! paid once, not per transaction.
//!
//! Argon2id rather than an iterated hash: memory-hardness is the property
//! that keeps offline guessing expensive on hardware the attacker chooses.
//! The default parameters (19 MiB, 2 passes) comfortably exceed the
//! "≥300k PBKDF2 iterations" class of work factor.
//!
//! Salts are 32 random bytes, fresh from the OS RNG on every call. There is
//! no salt caching and there must never be — a memoized salt generator
//! quietly turns "unique salt per derivation" into "one salt forever".

use argon2::Argon2;
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, KDF_SALT_LENGTH};

/// Errors from key derivation. One variant; the argon2 crate's failure
/// modes (bad parameter combinations, output length) are configuration
/// bugs, not runtime conditions worth distinguishing.
#[derive(Debug, Error)]
pub enum KdfError {
    #[error("key derivation failed")]
    DerivationFailed,
}

/// Generates a fresh random salt. Never reused, never cached.
pub fn generate_salt() -> [u8; KDF_SALT_LENGTH] {
    let mut salt = [0u8; KDF_SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives a 256-bit key from a secret and salt with Argon2id.
///
/// Deterministic for a fixed `(secret, salt)` pair — both sides of a
/// deployment can derive the same key from shared material.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; AES_KEY_LENGTH], KdfError> {
    let mut key = [0u8; AES_KEY_LENGTH];
    Argon2::default()
        .hash_password_into(secret, salt, &mut key)
        .map_err(|_| KdfError::DerivationFailed)?;
    Ok(key)
}
