//! Backend abstraction and the read-through query pipeline.
//!
//! [`Backend`] splits the store into two layers. Implementations provide
//! the primitive operations (point lookups, successor-link lookups, the
//! write pipeline, the range commit); the trait's provided methods build
//! every composite query on top of exactly two read primitives — object
//! fetch and successor fetch — with the shared object cache probed first.
//!
//! ## Read path
//!
//! ```text
//! caller ──▶ provided method ──▶ ObjectCache ──(miss)──▶ primitive op
//!                                                            │
//!            blob / key  ◀───────────────────────────────────┘
//! ```
//!
//! ## Write path
//!
//! Writes for one ledger are enqueued through the primitive write
//! operations and become visible atomically when [`Backend::finish_writes`]
//! commits the ledger range. A ledger whose range commit is rejected stays
//! invisible even though its rows are durable.

use async_trait::async_trait;
use chronicle_types::{
    book_end, fees_key, keylet_page, AccountId, AccountTransactionsData, AccountTxCursor,
    AccountTxPage, Blob, DirectoryPage, FeeSettings, Hash, LedgerHeader, LedgerObject, LedgerPage,
    LedgerRange, ObjectId, TransactionRecord,
};
use tracing::{debug, warn};

use crate::cache::ObjectCache;
use crate::error::{Error, InvariantViolationSnafu, Result};

pub mod cassandra;
pub mod memory;

/// Storage backend for ledger history.
///
/// Required methods are the primitive operations a concrete store must
/// supply; provided methods implement the caching and composite query
/// pipeline and are shared by every implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    // =========================================================================
    // Shared state
    // =========================================================================

    /// The object cache probed before every state read.
    fn cache(&self) -> &ObjectCache;

    /// The in-memory view of the committed ledger range.
    fn ledger_range(&self) -> Option<LedgerRange>;

    /// Replaces the in-memory ledger range.
    fn set_ledger_range(&self, range: LedgerRange);

    /// Extends the in-memory range to include `sequence`.
    fn update_ledger_range(&self, sequence: u32) {
        let next = match self.ledger_range() {
            Some(mut range) => {
                range.max_sequence = range.max_sequence.max(sequence);
                range
            }
            None => LedgerRange::new(sequence, sequence),
        };
        self.set_ledger_range(next);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the store: connects, creates missing schema (unless
    /// `read_only`), and prepares every statement.
    async fn open(&self, read_only: bool) -> Result<()>;

    /// Drains in-flight work and closes the store.
    async fn close(&self);

    // =========================================================================
    // Primitive reads
    // =========================================================================

    /// Point lookup of `key` at `sequence`, bypassing the cache.
    async fn fetch_ledger_object_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<Blob>>;

    /// Batched point lookup, bypassing the cache. The result preserves the
    /// order of `keys`; absent objects yield `None`.
    async fn fetch_ledger_objects_uncached(
        &self,
        keys: &[ObjectId],
        sequence: u32,
    ) -> Result<Vec<Option<Blob>>>;

    /// Successor-link lookup at `sequence`, bypassing the cache. Never
    /// returns a sentinel: the upper bookend and tombstones read as
    /// `None`.
    async fn fetch_successor_key_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<ObjectId>>;

    // =========================================================================
    // Ledger, transaction, and account reads
    // =========================================================================

    /// Newest committed sequence, if any ledger has been committed.
    async fn fetch_latest_ledger_sequence(&self) -> Result<Option<u32>>;

    /// Header of the ledger at `sequence`.
    async fn fetch_ledger_by_sequence(&self, sequence: u32) -> Result<Option<LedgerHeader>>;

    /// Header of the ledger identified by `hash`.
    async fn fetch_ledger_by_hash(&self, hash: &Hash) -> Result<Option<LedgerHeader>>;

    /// Reads the committed range from durable storage. May raise
    /// [`Error::Timeout`]; see
    /// [`hard_fetch_ledger_range_no_throw`](Backend::hard_fetch_ledger_range_no_throw).
    async fn hard_fetch_ledger_range(&self) -> Result<Option<LedgerRange>>;

    /// Transaction lookup by hash.
    async fn fetch_transaction(&self, hash: &Hash) -> Result<Option<TransactionRecord>>;

    /// Batched transaction lookup; preserves the order of `hashes`.
    async fn fetch_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<TransactionRecord>>>;

    /// Every transaction applied by the ledger at `sequence`.
    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: u32,
    ) -> Result<Vec<TransactionRecord>>;

    /// Hashes of every transaction applied by the ledger at `sequence`.
    async fn fetch_all_transaction_hashes_in_ledger(&self, sequence: u32) -> Result<Vec<Hash>>;

    /// A page of an account's transaction history, newest first unless
    /// `forward`.
    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTxCursor>,
    ) -> Result<AccountTxPage>;

    /// The set of objects mutated by the ledger at `sequence`; deletions
    /// carry an empty blob.
    async fn fetch_ledger_diff(&self, sequence: u32) -> Result<Vec<LedgerObject>>;

    // =========================================================================
    // Primitive writes
    // =========================================================================

    /// Marks the start of a ledger's write batch.
    async fn start_writes(&self) -> Result<()>;

    /// Enqueues a state object write. Use
    /// [`write_ledger_object`](Backend::write_ledger_object), which rejects
    /// the reserved bookends.
    async fn store_ledger_object(&self, key: ObjectId, sequence: u32, blob: Blob) -> Result<()>;

    /// Enqueues a successor-link write; `None` writes a tombstone.
    async fn write_successor(
        &self,
        key: ObjectId,
        sequence: u32,
        successor: Option<ObjectId>,
    ) -> Result<()>;

    /// Enqueues the ledger header write.
    async fn write_ledger(&self, header: &LedgerHeader) -> Result<()>;

    /// Enqueues a transaction write.
    async fn write_transaction(&self, record: TransactionRecord) -> Result<()>;

    /// Enqueues account-index writes for a ledger's transactions.
    async fn write_account_transactions(
        &self,
        data: Vec<AccountTransactionsData>,
    ) -> Result<()>;

    /// Drains the ledger's writes and commits the range advance to
    /// `sequence`.
    ///
    /// # Errors
    ///
    /// [`Error::CommitRejected`] when the conditional advance was refused
    /// without a timeout; the ledger is not visible.
    async fn commit_ledger(&self, sequence: u32) -> Result<()>;

    /// Removes whole-ledger history older than `keep` sequences behind the
    /// committed maximum and advances the range minimum.
    async fn online_delete(&self, keep: u32) -> Result<()>;

    // =========================================================================
    // Provided pipeline
    // =========================================================================

    /// Writes a state object after rejecting the reserved bookends.
    async fn write_ledger_object(&self, key: ObjectId, sequence: u32, blob: Blob) -> Result<()> {
        if key.is_sentinel() {
            return InvariantViolationSnafu {
                message: format!("refusing to write reserved key {key}"),
            }
            .fail();
        }
        self.store_ledger_object(key, sequence, blob).await
    }

    /// Point lookup of `key` at `sequence`, cache first.
    async fn fetch_ledger_object(&self, key: &ObjectId, sequence: u32) -> Result<Option<Blob>> {
        if let Some(blob) = self.cache().get(key, sequence) {
            debug!(%key, sequence, "object cache hit");
            return Ok(Some(blob));
        }
        debug!(%key, sequence, "object cache miss");
        self.fetch_ledger_object_uncached(key, sequence).await
    }

    /// Batched point lookup preserving input order: cache hits are filled
    /// first, the misses go to the store in a single call and are
    /// interleaved back into their original positions.
    async fn fetch_ledger_objects(
        &self,
        keys: &[ObjectId],
        sequence: u32,
    ) -> Result<Vec<Option<Blob>>> {
        let mut results: Vec<Option<Blob>> = Vec::with_capacity(keys.len());
        let mut misses = Vec::new();
        for key in keys {
            match self.cache().get(key, sequence) {
                Some(blob) => results.push(Some(blob)),
                None => {
                    misses.push(*key);
                    results.push(None);
                }
            }
        }
        debug!(
            hits = keys.len() - misses.len(),
            misses = misses.len(),
            sequence,
            "batched object fetch"
        );
        if !misses.is_empty() {
            let fetched = self.fetch_ledger_objects_uncached(&misses, sequence).await?;
            let mut fetched = fetched.into_iter();
            for slot in results.iter_mut() {
                if slot.is_none() {
                    *slot = fetched.next().flatten();
                }
            }
        }
        Ok(results)
    }

    /// Smallest key strictly greater than `key` at `sequence`, cache
    /// first.
    async fn fetch_successor_key(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<ObjectId>> {
        if let Some(entry) = self.cache().get_successor(key, sequence) {
            debug!(%key, sequence, "successor cache hit");
            return Ok(Some(entry.key));
        }
        debug!(%key, sequence, "successor cache miss");
        self.fetch_successor_key_uncached(key, sequence).await
    }

    /// Successor key together with its object.
    ///
    /// A successor key whose object is missing at the same sequence is a
    /// broken index and fails with [`Error::InvariantViolation`].
    async fn fetch_successor_object(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<LedgerObject>> {
        let Some(successor) = self.fetch_successor_key(key, sequence).await? else {
            return Ok(None);
        };
        match self.fetch_ledger_object(&successor, sequence).await? {
            Some(blob) => Ok(Some(LedgerObject { key: successor, blob })),
            None => InvariantViolationSnafu {
                message: format!(
                    "successor {successor} of {key} has no object at sequence {sequence}"
                ),
            }
            .fail(),
        }
    }

    /// Walks the offer directories of `book` at `sequence` and returns up
    /// to `limit` offers in directory order.
    ///
    /// The walk follows successor links from directory to directory and
    /// each directory's internal page chain, stopping at `limit` or at the
    /// end of the book's key range.
    async fn fetch_book_offers(
        &self,
        book: &ObjectId,
        sequence: u32,
        limit: u32,
        cursor: Option<ObjectId>,
    ) -> Result<Vec<LedgerObject>> {
        let limit = limit as usize;
        let upper = book_end(book);
        let mut tip = cursor.unwrap_or(*book);
        let mut keys: Vec<ObjectId> = Vec::new();

        while keys.len() < limit {
            let Some(seed) = self.fetch_successor_object(&tip, sequence).await? else {
                break;
            };
            if seed.key > upper {
                break;
            }
            let mut dir = seed;
            while keys.len() < limit {
                tip = dir.key;
                let page = DirectoryPage::from_blob(&dir.blob)?;
                keys.extend(page.indexes);
                let Some(next) = page.next_page else {
                    break;
                };
                let next_key = keylet_page(&tip, next);
                let Some(blob) = self.fetch_ledger_object(&next_key, sequence).await? else {
                    return InvariantViolationSnafu {
                        message: format!(
                            "directory chain of {tip} broken at page {next_key}"
                        ),
                    }
                    .fail();
                };
                dir = LedgerObject { key: next_key, blob };
            }
        }

        keys.truncate(limit);
        let blobs = self.fetch_ledger_objects(&keys, sequence).await?;
        let mut offers = Vec::with_capacity(keys.len());
        for (key, blob) in keys.into_iter().zip(blobs) {
            let Some(blob) = blob else {
                return InvariantViolationSnafu {
                    message: format!("offer {key} listed in a directory but missing"),
                }
                .fail();
            };
            offers.push(LedgerObject { key, blob });
        }
        Ok(offers)
    }

    /// Walks up to `limit` objects in key order starting after `cursor`
    /// (or from the beginning of the key space).
    async fn fetch_ledger_page(
        &self,
        cursor: Option<ObjectId>,
        sequence: u32,
        limit: u32,
    ) -> Result<LedgerPage> {
        let limit = limit as usize;
        let mut keys: Vec<ObjectId> = Vec::new();
        while keys.len() < limit {
            let from = match keys.last() {
                Some(last) => *last,
                None => cursor.unwrap_or(ObjectId::FIRST),
            };
            let Some(next) = self.fetch_successor_key(&from, sequence).await? else {
                break;
            };
            keys.push(next);
        }

        let blobs = self.fetch_ledger_objects(&keys, sequence).await?;
        let mut objects = Vec::with_capacity(keys.len());
        for (key, blob) in keys.into_iter().zip(blobs) {
            let Some(blob) = blob else {
                return InvariantViolationSnafu {
                    message: format!("object {key} reachable by successor walk but missing"),
                }
                .fail();
            };
            objects.push(LedgerObject { key, blob });
        }
        let next_cursor =
            if limit > 0 && objects.len() >= limit { objects.last().map(|o| o.key) } else { None };
        Ok(LedgerPage { objects, cursor: next_cursor })
    }

    /// Reads the fee settings object at `sequence`.
    async fn fetch_fees(&self, sequence: u32) -> Result<Option<FeeSettings>> {
        let key = fees_key();
        let Some(blob) = self.fetch_ledger_object(&key, sequence).await? else {
            warn!(sequence, "fee settings object missing");
            return Ok(None);
        };
        Ok(Some(FeeSettings::from_blob(&blob)?))
    }

    /// Commits the ledger at `sequence` and, on success, extends the
    /// in-memory range.
    ///
    /// Returns `false` when the range commit was rejected; the caller must
    /// not treat the ledger as visible.
    async fn finish_writes(&self, sequence: u32) -> Result<bool> {
        match self.commit_ledger(sequence).await {
            Ok(()) => {
                self.update_ledger_range(sequence);
                Ok(true)
            }
            Err(Error::CommitRejected { .. }) => {
                warn!(sequence, "range commit rejected");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Reads the committed range, retrying through timeouts until the
    /// store answers. Every other error propagates.
    async fn hard_fetch_ledger_range_no_throw(&self) -> Result<Option<LedgerRange>> {
        loop {
            match self.hard_fetch_ledger_range().await {
                Ok(range) => return Ok(range),
                Err(Error::Timeout { message }) => {
                    debug!(message, "retrying ledger range fetch after timeout");
                }
                Err(error) => return Err(error),
            }
        }
    }
}
