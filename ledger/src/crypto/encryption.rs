//! # Field Encryption
//!
//! AES-256-GCM sealing for sensitive payload values. When a domain payload
//! carries something that looks like a credential (see
//! [`crate::config::SENSITIVE_KEY_MARKERS`]), the value is replaced by a
//! sealed representation before the transaction is hashed, signed, or
//! stored — plaintext secrets never reach the ledger's indices.
//!
//! ## Nonce discipline
//!
//! GCM is unforgiving about nonce reuse: two messages under the same key
//! and nonce leak the XOR of the plaintexts and enable tag forgery. Every
//! seal here draws a fresh 96-bit nonce from the OS CSPRNG; the birthday
//! bound (~2^48 messages per key) is far beyond what a supply-chain ledger
//! will ever seal under one field key.
//!
//! ## Sealed representation
//!
//! A sealed value is a JSON object `{"ciphertext": <base64>, "nonce":
//! <base64>}`. The ciphertext includes GCM's 16-byte authentication tag.
//! The object shape doubles as the marker that tells verification which
//! fields need opening — no side-channel bookkeeping of "which keys were
//! sealed".
//!
//! Error variants are intentionally vague. The difference between "wrong
//! key" and "tampered ciphertext" is none of the caller's business, and
//! certainly none of an attacker's.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors during sealing/opening of sensitive values.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    /// Authentication failure: wrong key, flipped bit, or truncated
    /// ciphertext. GCM cannot tell them apart and neither can you.
    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    IntegrityFailure,

    #[error("sealed value is malformed")]
    MalformedSealedValue,
}

/// Encrypts plaintext under a 256-bit key with a fresh random nonce.
///
/// Returns `(ciphertext, nonce)` as separate values — the sealed-field
/// JSON representation carries them side by side, so there is no packed
/// wire format to slice apart later.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; AES_NONCE_LENGTH]), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypts a `(ciphertext, nonce)` pair produced by [`seal`].
///
/// Fails with [`EncryptionError::IntegrityFailure`] if the authentication
/// tag does not verify. There is no path that returns corrupted plaintext
/// without an error.
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    ciphertext: &[u8],
    nonce: &[u8; AES_NONCE_LENGTH],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::IntegrityFailure)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EncryptionError::IntegrityFailure)
}

// ---------------------------------------------------------------------------
// Sealed JSON values
// ---------------------------------------------------------------------------

/// Seals an arbitrary JSON value into the `{"ciphertext", "nonce"}`
/// representation. The plaintext is the value's canonical serialization,
/// so opening restores it exactly — type and all.
pub fn seal_value(
    key: &[u8; AES_KEY_LENGTH],
    value: &Value,
) -> Result<Value, EncryptionError> {
    let plaintext = super::hash::canonical_json(value);
    let (ciphertext, nonce) = seal(key, &plaintext)?;

    let mut sealed = Map::new();
    sealed.insert("ciphertext".into(), Value::String(BASE64.encode(ciphertext)));
    sealed.insert("nonce".into(), Value::String(BASE64.encode(nonce)));
    Ok(Value::Object(sealed))
}

/// Opens a sealed value back into the original JSON value.
pub fn open_value(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &Value,
) -> Result<Value, EncryptionError> {
    let obj = sealed
        .as_object()
        .ok_or(EncryptionError::MalformedSealedValue)?;

    let ciphertext_b64 = obj
        .get("ciphertext")
        .and_then(Value::as_str)
        .ok_or(EncryptionError::MalformedSealedValue)?;
    let nonce_b64 = obj
        .get("nonce")
        .and_then(Value::as_str)
        .ok_or(EncryptionError::MalformedSealedValue)?;

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|_| EncryptionError::MalformedSealedValue)?;
    let nonce_vec = BASE64
        .decode(nonce_b64)
        .map_err(|_| EncryptionError::MalformedSealedValue)?;
    let nonce: [u8; AES_NONCE_LENGTH] = nonce_vec
        .as_slice()
        .try_into()
        .map_err(|_| EncryptionError::MalformedSealedValue)?;

    let plaintext = open(key, &ciphertext, &nonce)?;
    serde_json::from_slice(&plaintext).map_err(|_| EncryptionError::MalformedSealedValue)
}

/// Returns `true` if a value has the sealed-field shape: an object with
/// exactly the `ciphertext` and `nonce` string members.
pub fn is_sealed_value(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.len() == 2
                && obj.get("ciphertext").map(Value::is_string).unwrap_or(false)
                && obj.get("nonce").map(Value::is_string).unwrap_or(false)
        }
        None => false,
    }
}
