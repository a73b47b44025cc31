//! # Transaction Store
//!
//! In-memory cache of sealed transactions, keyed by content hash, with
//! TTL-based expiry and timestamp-ordered queries.
//!
//! ## Design
//!
//! Two indices, kept in step:
//!
//! - `DashMap<hash, CachedEntry>` — the primary index. Lock-free concurrent
//!   reads for the hot path (verification lookups, status queries).
//! - `RwLock<BTreeMap<(timestamp_micros, sequence), hash>>` — the ordered
//!   secondary index behind history and report queries. Writers are the
//!   `put`/eviction paths; readers are the query operations. Ties on the
//!   microsecond are broken by insertion sequence, which makes query
//!   ordering a stable sort.
//!
//! ## Expiry
//!
//! One age test, two call sites: `get` applies it lazily on access and
//! evicts what it finds dead; `cleanup_expired` sweeps everything on the
//! retry worker's cadence. An entry younger than the TTL is never removed
//! by either.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::transaction::Transaction;

/// A stored transaction plus the bookkeeping needed for expiry.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub transaction: Transaction,
    pub cached_at: Instant,
}

/// Thread-safe TTL cache of sealed transactions.
pub struct TransactionStore {
    entries: DashMap<String, CachedEntry>,
    order: RwLock<BTreeMap<(i64, u64), String>>,
    ttl: Duration,
}

impl TransactionStore {
    /// Creates an empty store whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(BTreeMap::new()),
            ttl,
        }
    }

    /// Inserts or refreshes a transaction by hash.
    ///
    /// The hash is content-derived, so overwriting an existing key with
    /// different content is impossible by construction; overwriting with
    /// identical content is idempotent and refreshes the entry's age.
    pub fn put(&self, transaction: Transaction) {
        let order_key = (
            transaction.timestamp.timestamp_micros(),
            transaction.sequence,
        );
        let hash = transaction.hash.clone();

        self.order.write().insert(order_key, hash.clone());
        self.entries.insert(
            hash,
            CachedEntry {
                transaction,
                cached_at: Instant::now(),
            },
        );
    }

    /// Returns the transaction for `hash`, or `None` if absent or expired.
    /// An expired entry found here is evicted on the spot.
    pub fn get(&self, hash: &str) -> Option<Transaction> {
        let expired_key = match self.entries.get(hash) {
            None => return None,
            Some(entry) if !self.is_expired(&entry) => {
                return Some(entry.transaction.clone());
            }
            Some(entry) => (
                entry.transaction.timestamp.timestamp_micros(),
                entry.transaction.sequence,
            ),
        };

        // Lazy eviction: the entry guard is dropped before we mutate.
        self.entries.remove(hash);
        self.order.write().remove(&expired_key);
        None
    }

    /// Removes a transaction by hash, regardless of age. Used to roll back
    /// the local cache when a remote submission fails after sealing.
    pub fn remove(&self, hash: &str) -> Option<Transaction> {
        let (_, entry) = self.entries.remove(hash)?;
        self.order.write().remove(&(
            entry.transaction.timestamp.timestamp_micros(),
            entry.transaction.sequence,
        ));
        Some(entry.transaction)
    }

    /// Removes every entry older than the TTL. Returns how many went.
    pub fn cleanup_expired(&self) -> usize {
        let mut dead: Vec<(String, (i64, u64))> = Vec::new();
        for entry in self.entries.iter() {
            if self.is_expired(&entry) {
                dead.push((
                    entry.key().clone(),
                    (
                        entry.transaction.timestamp.timestamp_micros(),
                        entry.transaction.sequence,
                    ),
                ));
            }
        }

        if dead.is_empty() {
            return 0;
        }

        let mut order = self.order.write();
        for (hash, order_key) in &dead {
            self.entries.remove(hash);
            order.remove(order_key);
        }
        debug!(removed = dead.len(), "expired transactions evicted");
        dead.len()
    }

    /// Returns all live transactions matching `predicate`, ordered by
    /// timestamp ascending with insertion-order tie-break.
    ///
    /// Expired entries are skipped (not evicted — this is a read path;
    /// eviction belongs to `get` and the periodic sweep).
    pub fn query<F>(&self, predicate: F) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let hashes: Vec<String> = self.order.read().values().cloned().collect();

        hashes
            .iter()
            .filter_map(|hash| self.entries.get(hash))
            .filter(|entry| !self.is_expired(entry))
            .map(|entry| entry.transaction.clone())
            .filter(|tx| predicate(tx))
            .collect()
    }

    /// Hashes of all live transactions with `sequence <= max_sequence`,
    /// ordered by sequence. This is the Merkle prefix for the transaction
    /// holding that sequence number.
    pub fn hashes_up_to_sequence(&self, max_sequence: u64) -> Vec<String> {
        let mut with_seq: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|entry| !self.is_expired(entry))
            .filter(|entry| entry.transaction.sequence <= max_sequence)
            .map(|entry| (entry.transaction.sequence, entry.transaction.hash.clone()))
            .collect();

        with_seq.sort_unstable_by_key(|(seq, _)| *seq);
        with_seq.into_iter().map(|(_, hash)| hash).collect()
    }

    /// Number of entries currently held (expired-but-unswept included;
    /// the count is a cache statistic, not a correctness input).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &CachedEntry) -> bool {
        entry.cached_at.elapsed() > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn tx(sequence: u64, timestamp_secs: i64, tag: &str) -> Transaction {
        let payload = json!({"tag": tag}).as_object().unwrap().clone();
        Transaction {
            kind: TransactionKind::SensorReading,
            payload,
            timestamp: Utc.timestamp_opt(timestamp_secs, 0).unwrap(),
            sequence,
            hash: format!("hash-{}", tag),
            signature: String::new(),
            signer_public_key: String::new(),
            key_generation: 0,
            merkle_root: String::new(),
        }
    }

    #[test]
    fn put_get_round_trip() {
        let store = TransactionStore::new(Duration::from_secs(60));
        store.put(tx(0, 1_700_000_000, "a"));
        let got = store.get("hash-a").expect("present");
        assert_eq!(got.sequence, 0);
        assert!(store.get("hash-missing").is_none());
    }

    #[test]
    fn put_is_idempotent_for_identical_content() {
        let store = TransactionStore::new(Duration::from_secs(60));
        store.put(tx(0, 1_700_000_000, "a"));
        store.put(tx(0, 1_700_000_000, "a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = TransactionStore::new(Duration::from_millis(20));
        store.put(tx(0, 1_700_000_000, "a"));
        assert!(store.get("hash-a").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get("hash-a").is_none());
        // Lazy eviction actually removed it.
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn cleanup_respects_ttl_boundary() {
        let store = TransactionStore::new(Duration::from_millis(50));
        store.put(tx(0, 1_700_000_000, "old"));
        std::thread::sleep(Duration::from_millis(70));
        store.put(tx(1, 1_700_000_001, "young"));

        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert!(store.get("hash-old").is_none());
        assert!(store.get("hash-young").is_some());
    }

    #[test]
    fn cleanup_on_empty_store_is_a_noop() {
        let store = TransactionStore::new(Duration::from_millis(10));
        assert_eq!(store.cleanup_expired(), 0);
    }

    #[test]
    fn query_orders_by_timestamp_then_insertion() {
        let store = TransactionStore::new(Duration::from_secs(60));
        // Inserted out of chronological order, with a timestamp tie.
        store.put(tx(2, 1_700_000_010, "late"));
        store.put(tx(0, 1_700_000_000, "tie-first"));
        store.put(tx(1, 1_700_000_000, "tie-second"));

        let all = store.query(|_| true);
        let tags: Vec<&str> = all
            .iter()
            .map(|t| t.payload["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["tie-first", "tie-second", "late"]);
    }

    #[test]
    fn query_applies_predicate() {
        let store = TransactionStore::new(Duration::from_secs(60));
        store.put(tx(0, 1_700_000_000, "keep"));
        store.put(tx(1, 1_700_000_001, "drop"));

        let kept = store.query(|t| t.payload["tag"] == "keep");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].hash, "hash-keep");
    }

    #[test]
    fn merkle_prefix_is_sequence_ordered_and_bounded() {
        let store = TransactionStore::new(Duration::from_secs(60));
        // Timestamps deliberately disagree with sequence order — a retried
        // transaction keeps its original (older) timestamp but seals with
        // a newer sequence.
        store.put(tx(0, 1_700_000_005, "s0"));
        store.put(tx(1, 1_700_000_001, "s1"));
        store.put(tx(2, 1_700_000_003, "s2"));

        assert_eq!(
            store.hashes_up_to_sequence(1),
            vec!["hash-s0".to_string(), "hash-s1".to_string()]
        );
        assert_eq!(store.hashes_up_to_sequence(2).len(), 3);
    }
}
