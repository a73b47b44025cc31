//! # Canonical Serialization & Hashing
//!
//! A transaction's hash is its identity, so the bytes that go into the
//! hasher must be identical no matter which thread, process, or deployment
//! computes them. Two things make that true:
//!
//! - **Canonical JSON** — object keys are emitted in sorted order at every
//!   nesting level, with `serde_json`'s stable number and string formatting.
//!   We sort explicitly rather than trusting the map type's iteration order,
//!   so enabling `preserve_order` somewhere in the dependency graph can
//!   never silently change every transaction hash in the fleet.
//! - **BLAKE3 with domain separation** — every digest use gets its own
//!   `derive_key` context (see [`crate::config`]), so a transaction digest
//!   can never collide with a Merkle node or a cache key even over
//!   identical input bytes.
//!
//! BLAKE3 over SHA-2/SHA-3 for the usual reasons: ~5x faster per byte,
//! 256-bit output, and a built-in keyed/derive mode that makes domain
//! separation a one-liner instead of an ad-hoc prefix convention.

use serde_json::{Map, Value};

use crate::config::{
    DIGEST_LENGTH, MERKLE_NODE_CONTEXT, TRANSACTION_DIGEST_CONTEXT,
};

/// A 32-byte digest. Fixed-size everywhere internally; hex at the API edges.
pub type Digest = [u8; DIGEST_LENGTH];

/// The root of an empty Merkle tree: all zeros. A sentinel, not a hash —
/// no input produces it (BLAKE3 output is never all-zero in practice, and
/// we never hash an empty leaf list).
pub const EMPTY_ROOT: Digest = [0u8; DIGEST_LENGTH];

/// Returns the empty-tree sentinel as lowercase hex.
pub fn empty_root_hex() -> String {
    hex::encode(EMPTY_ROOT)
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Serializes a JSON value with sorted object keys at every nesting level.
///
/// Scalars (numbers, strings, booleans, null) are delegated to `serde_json`
/// so their formatting matches ordinary serialization exactly. Only the
/// key ordering of objects is imposed here.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_canonical(value, &mut out);
    out
}

/// Canonical bytes of a payload map. Convenience wrapper for the common
/// case where the top level is a JSON object.
pub fn canonical_payload(payload: &Map<String, Value>) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_canonical_object(payload, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        // Scalar formatting is serde_json's problem, and serde_json is
        // deterministic for a given value. Infallible for scalars.
        scalar => out.extend_from_slice(
            serde_json::to_string(scalar)
                .expect("scalar JSON serialization cannot fail")
                .as_bytes(),
        ),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut Vec<u8>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push(b'{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(
            serde_json::to_string(key.as_str())
                .expect("string JSON serialization cannot fail")
                .as_bytes(),
        );
        out.push(b':');
        write_canonical(&map[key.as_str()], out);
    }
    out.push(b'}');
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

/// Domain-separated BLAKE3 over a list of byte slices.
///
/// The parts are fed sequentially into one hasher — same result as hashing
/// the concatenation, without the temporary buffer.
pub fn keyed_digest(context: &str, parts: &[&[u8]]) -> Digest {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Content digest of a transaction: domain-separated BLAKE3 over the kind's
/// wire name and the canonical payload serialization.
///
/// Pure function of its inputs. Identical `(kind, payload)` content always
/// produces the identical digest; any single-field mutation changes it.
/// The kind is separated from the payload bytes by a NUL so that no
/// kind/payload pair can alias another by shifting bytes across the
/// boundary.
pub fn transaction_digest(kind_wire_name: &str, payload: &Map<String, Value>) -> Digest {
    let canonical = canonical_payload(payload);
    keyed_digest(
        TRANSACTION_DIGEST_CONTEXT,
        &[kind_wire_name.as_bytes(), &[0x00], &canonical],
    )
}

/// Hex-encoded variant of [`transaction_digest`], for the API edge where
/// hashes travel as strings.
pub fn transaction_digest_hex(kind_wire_name: &str, payload: &Map<String, Value>) -> String {
    hex::encode(transaction_digest(kind_wire_name, payload))
}

// ---------------------------------------------------------------------------
// Merkle Tree
// ---------------------------------------------------------------------------

/// Computes the binary Merkle root over an ordered list of leaf digests.
///
/// Plain binary tree, built bottom-up. When a level has an odd number of
/// nodes the last node is duplicated and paired with itself — the Bitcoin
/// convention. The duplication is a documented tie-break with known
/// sharp edges (CVE-2012-2459-style set ambiguity); the ledger neutralizes
/// it by using content-derived transaction hashes as leaves, so duplicate
/// leaves mean duplicate transactions, which the store's hash keying
/// already collapses.
///
/// A single leaf is also paired with itself, so the root is always the
/// output of a node hash, never a raw leaf. Empty input returns
/// [`EMPTY_ROOT`].
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }

    let mut level: Vec<Digest> = leaves.to_vec();

    loop {
        let mut next: Vec<Digest> = Vec::with_capacity((level.len() + 1) / 2);

        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(keyed_digest(MERKLE_NODE_CONTEXT, &[left, right]));
        }

        if next.len() == 1 {
            return next[0];
        }
        level = next;
    }
}

/// Merkle root over hex-encoded leaves, returning hex.
///
/// Leaves that fail to decode as 32-byte hex are hashed from their raw
/// string bytes instead of being skipped — a malformed leaf must change
/// the root, not vanish from it.
pub fn merkle_root_hex(leaves: &[String]) -> String {
    let decoded: Vec<Digest> = leaves
        .iter()
        .map(|leaf| {
            let mut digest = EMPTY_ROOT;
            match hex::decode(leaf) {
                Ok(bytes) if bytes.len() == DIGEST_LENGTH => {
                    digest.copy_from_slice(&bytes);
                    digest
                }
                _ => keyed_digest(MERKLE_NODE_CONTEXT, &[leaf.as_bytes()]),
            }
        })
        .collect();

    hex::encode(merkle_root(&decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().expect("test payload must be an object").clone()
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let mut map = Map::new();
        map.insert("zebra".into(), json!(1));
        map.insert("apple".into(), json!(2));
        map.insert("mango".into(), json!(3));

        let bytes = canonical_payload(&map);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":2,"mango":3,"zebra":1}"#
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let map = payload(json!({
            "outer": {"z": 1, "a": {"y": 2, "b": 3}},
            "list": [{"k2": 1, "k1": 2}]
        }));
        let bytes = canonical_payload(&map);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"list":[{"k1":2,"k2":1}],"outer":{"a":{"b":3,"y":2},"z":1}}"#
        );
    }

    #[test]
    fn transaction_digest_is_deterministic() {
        let p = payload(json!({"sensor_id": "S1", "data": {"temperature": 4.0}}));
        let a = transaction_digest_hex("sensor_reading", &p);
        let b = transaction_digest_hex("sensor_reading", &p);
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_LENGTH * 2);
    }

    #[test]
    fn transaction_digest_changes_on_field_mutation() {
        let a = transaction_digest_hex(
            "sensor_reading",
            &payload(json!({"sensor_id": "S1", "data": {"temperature": 4.0}})),
        );
        let b = transaction_digest_hex(
            "sensor_reading",
            &payload(json!({"sensor_id": "S1", "data": {"temperature": 4.1}})),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn transaction_digest_depends_on_kind() {
        let p = payload(json!({"shipment_id": "SHIP-1"}));
        let a = transaction_digest_hex("shipment_creation", &p);
        let b = transaction_digest_hex("shipment_update", &p);
        assert_ne!(a, b);
    }

    #[test]
    fn key_order_does_not_matter() {
        // Same content, different insertion order — same digest.
        let mut a = Map::new();
        a.insert("x".into(), json!(1));
        a.insert("y".into(), json!(2));
        let mut b = Map::new();
        b.insert("y".into(), json!(2));
        b.insert("x".into(), json!(1));
        assert_eq!(
            transaction_digest("quality_check", &a),
            transaction_digest("quality_check", &b)
        );
    }

    #[test]
    fn merkle_root_empty_is_sentinel() {
        assert_eq!(merkle_root(&[]), EMPTY_ROOT);
        assert_eq!(merkle_root_hex(&[]), empty_root_hex());
    }

    #[test]
    fn merkle_root_single_leaf_pairs_with_itself() {
        let leaf = keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[b"only child"]);
        let expected = keyed_digest(MERKLE_NODE_CONTEXT, &[&leaf, &leaf]);
        assert_eq!(merkle_root(&[leaf]), expected);
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let leaves: Vec<Digest> = (0u8..7)
            .map(|i| keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[&[i]]))
            .collect();
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
    }

    #[test]
    fn merkle_root_order_matters() {
        let a = keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[b"first"]);
        let b = keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[b"second"]);
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn merkle_root_changes_on_append() {
        let leaves: Vec<Digest> = (0u8..4)
            .map(|i| keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[&[i]]))
            .collect();
        let root_before = merkle_root(&leaves[..3]);
        let root_after = merkle_root(&leaves);
        assert_ne!(root_before, root_after);
    }

    #[test]
    fn merkle_root_hex_round_trips_hex_leaves() {
        let leaf = keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[b"leaf"]);
        let via_hex = merkle_root_hex(&[hex::encode(leaf)]);
        assert_eq!(via_hex, hex::encode(merkle_root(&[leaf])));
    }

    #[test]
    fn merkle_root_hex_malformed_leaf_still_contributes() {
        // A garbage leaf must perturb the root, not be dropped.
        let good = hex::encode(keyed_digest(TRANSACTION_DIGEST_CONTEXT, &[b"ok"]));
        let with_garbage = merkle_root_hex(&[good.clone(), "not-hex".to_string()]);
        let without = merkle_root_hex(&[good]);
        assert_ne!(with_garbage, without);
    }
}
