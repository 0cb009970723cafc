//! Successor-link maintenance across ledger versions.
//!
//! The successor table stores, per sequence, an edge from each key to the
//! next key in sorted order, bounded by the reserved bookends. Walking the
//! edges from [`ObjectId::FIRST`] at any sequence yields exactly the keys
//! live at that sequence.
//!
//! Each ledger's diff splices the linked list: an insert rewrites the
//! predecessor's edge and adds one edge for the new key; a delete rewrites
//! the predecessor's edge past the victim and tombstones the victim's own
//! edge. Neighbours are located in the cache snapshot of the previous
//! sequence, combined with an overlay of the mutations already processed
//! from the same diff — never in the partially written links of the
//! in-progress sequence.

use std::collections::{BTreeMap, BTreeSet};

use chronicle_types::{LedgerObject, ObjectId};
use tracing::debug;

use crate::backend::Backend;
use crate::cache::ObjectCache;
use crate::error::{InvariantViolationSnafu, Result};

/// One successor-link write: at the diff's sequence, `key` points at
/// `successor` (`None` writes a tombstone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorUpdate {
    /// Source key of the edge.
    pub key: ObjectId,
    /// Target of the edge; `None` tombstones the source.
    pub successor: Option<ObjectId>,
}

/// Overlay of the mutations already processed from the current diff,
/// merged over the previous sequence's snapshot for neighbour lookups.
#[derive(Debug, Default)]
struct DiffOverlay {
    inserted: BTreeSet<ObjectId>,
    removed: BTreeSet<ObjectId>,
}

impl DiffOverlay {
    /// Largest live key strictly below `key`, or the lower bookend.
    fn neighbour_before(&self, cache: &ObjectCache, sequence: u32, key: &ObjectId) -> ObjectId {
        let overlay = self.inserted.range(..*key).next_back().copied();
        let mut snapshot = cache.get_predecessor(key, sequence).map(|o| o.key);
        while let Some(candidate) = snapshot {
            if self.removed.contains(&candidate) {
                snapshot = cache.get_predecessor(&candidate, sequence).map(|o| o.key);
            } else {
                break;
            }
        }
        match (snapshot, overlay) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => ObjectId::FIRST,
        }
    }

    /// Smallest live key strictly above `key`, or the upper bookend.
    fn neighbour_after(&self, cache: &ObjectCache, sequence: u32, key: &ObjectId) -> ObjectId {
        let overlay = self
            .inserted
            .range((std::ops::Bound::Excluded(*key), std::ops::Bound::Unbounded))
            .next()
            .copied();
        let mut snapshot = cache.get_successor(key, sequence).map(|o| o.key);
        while let Some(candidate) = snapshot {
            if self.removed.contains(&candidate) {
                snapshot = cache.get_successor(&candidate, sequence).map(|o| o.key);
            } else {
                break;
            }
        }
        match (snapshot, overlay) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => ObjectId::LAST,
        }
    }

    fn is_live(&self, cache: &ObjectCache, sequence: u32, key: &ObjectId) -> bool {
        if self.inserted.contains(key) {
            return true;
        }
        if self.removed.contains(key) {
            return false;
        }
        cache.get(key, sequence).is_some()
    }
}

/// Computes the successor-link writes for the diff applied at `sequence`.
///
/// The cache must hold the full snapshot of `sequence - 1`; feeding it the
/// already-updated state would locate neighbours in the in-progress ledger
/// and corrupt the links. Later mutations of the same source key within
/// one diff supersede earlier ones, so each key is written at most once.
pub fn successor_updates(
    cache: &ObjectCache,
    diff: &[LedgerObject],
    sequence: u32,
) -> Result<Vec<SuccessorUpdate>> {
    let previous = sequence.checked_sub(1).filter(|s| *s > 0);
    let Some(previous) = previous else {
        return InvariantViolationSnafu {
            message: format!("cannot maintain successor links for sequence {sequence}"),
        }
        .fail();
    };
    if cache.latest_sequence() != Some(previous) || !cache.is_full() {
        return InvariantViolationSnafu {
            message: format!(
                "successor maintenance for sequence {sequence} needs the full snapshot of {previous}"
            ),
        }
        .fail();
    }

    let mut overlay = DiffOverlay::default();
    let mut pending: BTreeMap<ObjectId, Option<ObjectId>> = BTreeMap::new();

    for object in diff {
        if object.key.is_sentinel() {
            return InvariantViolationSnafu {
                message: format!("diff touches reserved key {}", object.key),
            }
            .fail();
        }
        let live = overlay.is_live(cache, previous, &object.key);
        if object.is_deletion() {
            if !live {
                debug!(key = %object.key, sequence, "deletion of an absent key; no link change");
                continue;
            }
            let before = overlay.neighbour_before(cache, previous, &object.key);
            let after = overlay.neighbour_after(cache, previous, &object.key);
            pending.insert(before, Some(after));
            pending.insert(object.key, None);
            overlay.removed.insert(object.key);
            overlay.inserted.remove(&object.key);
        } else if !live {
            let before = overlay.neighbour_before(cache, previous, &object.key);
            let after = overlay.neighbour_after(cache, previous, &object.key);
            pending.insert(before, Some(object.key));
            pending.insert(object.key, Some(after));
            overlay.inserted.insert(object.key);
            overlay.removed.remove(&object.key);
        }
        // An update to an existing key leaves the links untouched.
    }

    Ok(pending
        .into_iter()
        .map(|(key, successor)| SuccessorUpdate { key, successor })
        .collect())
}

/// Computes the link writes for `diff` at `sequence` and enqueues them on
/// the backend. Call before the cache is advanced past `sequence - 1`.
pub async fn apply_successor_updates<B: Backend + ?Sized>(
    backend: &B,
    diff: &[LedgerObject],
    sequence: u32,
) -> Result<()> {
    let updates = successor_updates(backend.cache(), diff, sequence)?;
    debug!(sequence, links = updates.len(), "writing successor updates");
    for update in updates {
        backend.write_successor(update.key, sequence, update.successor).await?;
    }
    Ok(())
}
