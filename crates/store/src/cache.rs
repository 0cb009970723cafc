//! In-memory snapshot cache over the ledger object set.
//!
//! The cache holds, for every live object, the blob it carried at the
//! latest known sequence together with the sequence that last mutated it.
//! That pair is enough to answer historical reads without version history:
//! an entry is authoritative for sequence `S` exactly when its
//! last-mutation sequence is `<= S`, because the object was untouched
//! between that mutation and the latest ledger.
//!
//! The cache only ever advances by whole-ledger diffs, applied under a
//! single write lock, so readers always observe a consistent snapshot.
//! Misses degrade to the backing store; correctness never depends on a
//! hit. Successor and predecessor scans additionally require the cache to
//! hold a complete snapshot, since a partial map cannot prove that no key
//! lies between two entries.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chronicle_types::{Blob, LedgerObject, ObjectId};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{InvariantViolationSnafu, Result};

/// A cached object: the blob it held at the cache's latest sequence and
/// the sequence that last mutated it.
#[derive(Debug, Clone)]
struct CachedObject {
    sequence: u32,
    blob: Blob,
}

/// Snapshot cache keyed by object id, advanced one whole ledger diff at a
/// time.
#[derive(Debug)]
pub struct ObjectCache {
    map: RwLock<BTreeMap<ObjectId, CachedObject>>,
    /// Latest sequence applied; zero until the cache has seen any state.
    latest: AtomicU32,
    /// Set once the cache holds the complete object set of its latest
    /// sequence. Required for successor/predecessor answers.
    full: AtomicBool,
    /// How many sequences behind the latest the cache will serve.
    window: u32,
}

impl ObjectCache {
    /// Creates an empty cache serving at most `window` sequences of
    /// history.
    pub fn new(window: u32) -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            latest: AtomicU32::new(0),
            full: AtomicBool::new(false),
            window,
        }
    }

    /// Latest sequence the cache reflects, if it has seen any state.
    pub fn latest_sequence(&self) -> Option<u32> {
        match self.latest.load(Ordering::Acquire) {
            0 => None,
            sequence => Some(sequence),
        }
    }

    /// True once the cache holds a complete snapshot.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Number of live objects currently cached.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when no objects are cached.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Primes the cache with the complete object set of `sequence`.
    ///
    /// After this call successor and predecessor lookups are answered from
    /// memory.
    pub fn initialize(&self, objects: Vec<LedgerObject>, sequence: u32) {
        let mut map = self.map.write();
        map.clear();
        for object in objects {
            if object.is_deletion() {
                continue;
            }
            map.insert(object.key, CachedObject { sequence, blob: object.blob });
        }
        self.latest.store(sequence, Ordering::Release);
        self.full.store(true, Ordering::Release);
        debug!(sequence, objects = map.len(), "object cache initialized");
    }

    /// Applies the diff for `sequence` and advances the cache.
    ///
    /// Diffs must arrive in sequence order once the cache has seen any
    /// state; partial or out-of-order application would silently corrupt
    /// every later read.
    pub fn update(&self, diff: &[LedgerObject], sequence: u32) -> Result<()> {
        let mut map = self.map.write();
        let latest = self.latest.load(Ordering::Acquire);
        if latest != 0 && sequence != latest + 1 {
            return InvariantViolationSnafu {
                message: format!(
                    "cache diff for sequence {sequence} applied on top of {latest}"
                ),
            }
            .fail();
        }
        for object in diff {
            if object.is_deletion() {
                map.remove(&object.key);
            } else {
                map.insert(
                    object.key,
                    CachedObject { sequence, blob: object.blob.clone() },
                );
            }
        }
        self.latest.store(sequence, Ordering::Release);
        Ok(())
    }

    /// Returns the blob held by `key` at `sequence` when the cache can
    /// answer authoritatively, `None` otherwise.
    pub fn get(&self, key: &ObjectId, sequence: u32) -> Option<Blob> {
        if !self.serves(sequence) {
            return None;
        }
        let map = self.map.read();
        let entry = map.get(key)?;
        if entry.sequence <= sequence {
            Some(entry.blob.clone())
        } else {
            None
        }
    }

    /// Returns the smallest-key object strictly greater than `key` at
    /// `sequence`, when the cache can answer authoritatively.
    ///
    /// Only the latest sequence can be answered: a key deleted after
    /// `sequence` leaves no trace in the map, so a scan at an older
    /// sequence could silently skip it. Older sequences degrade to the
    /// store.
    pub fn get_successor(&self, key: &ObjectId, sequence: u32) -> Option<LedgerObject> {
        if !self.scans(sequence) {
            return None;
        }
        let map = self.map.read();
        let (next_key, entry) = map.range((Bound::Excluded(*key), Bound::Unbounded)).next()?;
        Some(LedgerObject { key: *next_key, blob: entry.blob.clone() })
    }

    /// Returns the largest-key object strictly less than `key` at
    /// `sequence`, when the cache can answer authoritatively. Same
    /// latest-only rule as [`ObjectCache::get_successor`].
    pub fn get_predecessor(&self, key: &ObjectId, sequence: u32) -> Option<LedgerObject> {
        if !self.scans(sequence) {
            return None;
        }
        let map = self.map.read();
        let (prev_key, entry) =
            map.range((Bound::Unbounded, Bound::Excluded(*key))).next_back()?;
        Some(LedgerObject { key: *prev_key, blob: entry.blob.clone() })
    }

    /// True when ordered scans may be answered for `sequence`: the cache
    /// must hold the complete snapshot and `sequence` must be its latest.
    fn scans(&self, sequence: u32) -> bool {
        let latest = self.latest.load(Ordering::Acquire);
        self.is_full() && latest != 0 && sequence == latest
    }

    /// True when `sequence` falls inside the servable window.
    fn serves(&self, sequence: u32) -> bool {
        let latest = self.latest.load(Ordering::Acquire);
        if latest == 0 || sequence > latest {
            return false;
        }
        latest - sequence <= self.window
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(fill: u8) -> ObjectId {
        ObjectId::new([fill; 32])
    }

    fn object(fill: u8, blob: &[u8]) -> LedgerObject {
        LedgerObject::new(key(fill), blob.to_vec())
    }

    fn primed() -> ObjectCache {
        let cache = ObjectCache::new(16);
        cache.initialize(vec![object(0x10, b"a"), object(0x20, b"b")], 100);
        cache
    }

    #[test]
    fn test_empty_cache_answers_nothing() {
        let cache = ObjectCache::new(16);
        assert_eq!(cache.get(&key(0x10), 100), None);
        assert!(cache.get_successor(&ObjectId::FIRST, 100).is_none());
        assert_eq!(cache.latest_sequence(), None);
    }

    #[test]
    fn test_get_at_latest_and_later_mutation_rules() {
        let cache = primed();
        assert_eq!(cache.get(&key(0x10), 100), Some(b"a".to_vec()));

        cache.update(&[object(0x10, b"a2")], 101).expect("update");
        // The entry now carries sequence 101; it cannot answer for 100.
        assert_eq!(cache.get(&key(0x10), 100), None);
        assert_eq!(cache.get(&key(0x10), 101), Some(b"a2".to_vec()));
        // Untouched entries stay authoritative for older sequences.
        assert_eq!(cache.get(&key(0x20), 100), Some(b"b".to_vec()));
        assert_eq!(cache.get(&key(0x20), 101), Some(b"b".to_vec()));
    }

    #[test]
    fn test_future_sequences_are_never_served() {
        let cache = primed();
        assert_eq!(cache.get(&key(0x10), 101), None);
    }

    #[test]
    fn test_window_bounds_served_history() {
        let cache = ObjectCache::new(2);
        cache.initialize(vec![object(0x10, b"a")], 100);
        for sequence in 101..=105 {
            cache.update(&[], sequence).expect("update");
        }
        assert_eq!(cache.get(&key(0x10), 103), Some(b"a".to_vec()));
        assert_eq!(cache.get(&key(0x10), 102), None);
    }

    #[test]
    fn test_deletion_removes_the_entry() {
        let cache = primed();
        cache.update(&[object(0x10, b"")], 101).expect("update");
        assert_eq!(cache.get(&key(0x10), 101), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get_successor(&ObjectId::FIRST, 101).map(|o| o.key),
            Some(key(0x20))
        );
    }

    #[test]
    fn test_out_of_order_diff_rejected() {
        let cache = primed();
        assert!(cache.update(&[], 102).is_err());
        assert!(cache.update(&[], 100).is_err());
        assert!(cache.update(&[], 101).is_ok());
    }

    #[test]
    fn test_successor_requires_full_snapshot() {
        let cache = ObjectCache::new(16);
        // Advance without priming: lookups must degrade to the store.
        cache.update(&[object(0x10, b"a")], 100).expect("update");
        assert_eq!(cache.get(&key(0x10), 100), Some(b"a".to_vec()));
        assert!(cache.get_successor(&ObjectId::FIRST, 100).is_none());
        assert!(cache.get_predecessor(&ObjectId::LAST, 100).is_none());
    }

    #[test]
    fn test_scans_only_answer_at_the_latest_sequence() {
        let cache = primed();
        cache.update(&[object(0x18, b"mid")], 101).expect("update");
        // At 101 the new entry is the successor of 0x10.
        assert_eq!(
            cache.get_successor(&key(0x10), 101).map(|o| o.key),
            Some(key(0x18))
        );
        // At 100 the map cannot prove what lay between the entries (keys
        // deleted since then have vanished); it must decline.
        assert!(cache.get_successor(&key(0x10), 100).is_none());
        assert!(cache.get_predecessor(&key(0x20), 100).is_none());
    }

    #[test]
    fn test_predecessor_walks_backwards() {
        let cache = primed();
        assert_eq!(
            cache.get_predecessor(&key(0x20), 100).map(|o| o.key),
            Some(key(0x10))
        );
        assert!(cache.get_predecessor(&key(0x10), 100).is_none());
        assert_eq!(
            cache.get_predecessor(&ObjectId::LAST, 100).map(|o| o.key),
            Some(key(0x20))
        );
    }
}
