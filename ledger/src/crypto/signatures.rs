//! # Signature Verification
//!
//! The verify half of the signing story. Signing lives on
//! [`super::keys::KeyRing`] because it needs the private key; verification
//! lives here because it needs nothing but bytes off the wire.
//!
//! One rule governs this module: **verification never panics and never
//! errors**. Malformed hex, a truncated signature, a public key that is
//! not a valid curve point — every failure mode collapses to `false`.
//! Callers get a boolean, attackers get no oracle.
//!
//! We use ed25519-dalek's strict verification, which rejects the
//! small-order and non-canonical edge cases that lenient implementations
//! wave through. The ledger has no legacy peers to stay compatible with,
//! so stricter is simply safer.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

/// Verifies a hex-encoded Ed25519 signature over `message` against a
/// hex-encoded public key. Returns `false` on any failure: bad encodings,
/// wrong lengths, invalid points, or a signature that simply does not
/// verify. No distinction is offered between those cases.
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_array) = <[u8; VERIFYING_KEY_LENGTH]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_array) else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_array) = <[u8; SIGNATURE_LENGTH]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    verifying_key.verify(message, &signature).is_ok()
}
