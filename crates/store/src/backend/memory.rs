//! In-memory ledger store for tests and local development.
//!
//! Implements [`Backend`] over ordered maps with the same observable
//! semantics as the production store: versioned rows resolved by "newest
//! at or below S", tombstones as empty values, and a conditional
//! range-commit that is the sole visibility event. Writes apply
//! synchronously, so the drain step of the commit is trivial.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chronicle_types::{
    AccountId, AccountTransactionsData, AccountTxCursor, AccountTxPage, Blob, CacheConfig, Hash,
    LedgerHeader, LedgerObject, LedgerRange, ObjectId, TransactionRecord,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::backend::Backend;
use crate::cache::ObjectCache;
use crate::error::{CommitRejectedSnafu, InvariantViolationSnafu, Result};

/// Versioned cell: value per sequence, newest-wins at or below a query
/// sequence. `None` in the successor map is a tombstone.
type Versioned<T> = BTreeMap<ObjectId, BTreeMap<u32, T>>;

#[derive(Debug, Default)]
struct Tables {
    objects: Versioned<Blob>,
    successors: Versioned<Option<ObjectId>>,
    diffs: BTreeMap<u32, BTreeSet<ObjectId>>,
    transactions: HashMap<Hash, TransactionRecord>,
    ledger_transactions: BTreeMap<u32, BTreeSet<Hash>>,
    account_tx: BTreeMap<AccountId, BTreeMap<AccountTxCursor, Hash>>,
    ledgers: BTreeMap<u32, LedgerHeader>,
    ledger_hashes: HashMap<Hash, u32>,
    /// The two durable range cells; the commit protocol's conditional
    /// updates run against these.
    committed_min: Option<u32>,
    committed_max: Option<u32>,
}

/// In-memory implementation of [`Backend`].
#[derive(Debug)]
pub struct InMemoryBackend {
    cache: ObjectCache,
    range: RwLock<Option<LedgerRange>>,
    tables: RwLock<Tables>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            cache: ObjectCache::new(cache.window),
            range: RwLock::new(None),
            tables: RwLock::new(Tables::default()),
        }
    }

    fn resolve<T: Clone>(table: &Versioned<T>, key: &ObjectId, sequence: u32) -> Option<T> {
        table.get(key)?.range(..=sequence).next_back().map(|(_, value)| value.clone())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    fn ledger_range(&self) -> Option<LedgerRange> {
        *self.range.read()
    }

    fn set_ledger_range(&self, range: LedgerRange) {
        *self.range.write() = Some(range);
    }

    async fn open(&self, _read_only: bool) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}

    async fn fetch_ledger_object_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<Blob>> {
        let tables = self.tables.read();
        Ok(Self::resolve(&tables.objects, key, sequence).filter(|blob| !blob.is_empty()))
    }

    async fn fetch_ledger_objects_uncached(
        &self,
        keys: &[ObjectId],
        sequence: u32,
    ) -> Result<Vec<Option<Blob>>> {
        let tables = self.tables.read();
        Ok(keys
            .iter()
            .map(|key| {
                Self::resolve(&tables.objects, key, sequence).filter(|blob| !blob.is_empty())
            })
            .collect())
    }

    async fn fetch_successor_key_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<ObjectId>> {
        let tables = self.tables.read();
        let next = Self::resolve(&tables.successors, key, sequence).flatten();
        Ok(next.filter(|next| *next != ObjectId::LAST))
    }

    async fn fetch_latest_ledger_sequence(&self) -> Result<Option<u32>> {
        Ok(self.tables.read().committed_max)
    }

    async fn fetch_ledger_by_sequence(&self, sequence: u32) -> Result<Option<LedgerHeader>> {
        Ok(self.tables.read().ledgers.get(&sequence).cloned())
    }

    async fn fetch_ledger_by_hash(&self, hash: &Hash) -> Result<Option<LedgerHeader>> {
        let sequence = {
            let tables = self.tables.read();
            tables.ledger_hashes.get(hash).copied()
        };
        match sequence {
            Some(sequence) => self.fetch_ledger_by_sequence(sequence).await,
            None => Ok(None),
        }
    }

    async fn hard_fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        let tables = self.tables.read();
        match (tables.committed_min, tables.committed_max) {
            (Some(min), Some(max)) => Ok(Some(LedgerRange::new(min.min(max), max.max(min)))),
            (Some(only), None) | (None, Some(only)) => Ok(Some(LedgerRange::new(only, only))),
            (None, None) => Ok(None),
        }
    }

    async fn fetch_transaction(&self, hash: &Hash) -> Result<Option<TransactionRecord>> {
        Ok(self.tables.read().transactions.get(hash).cloned())
    }

    async fn fetch_transactions(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<Option<TransactionRecord>>> {
        let tables = self.tables.read();
        Ok(hashes.iter().map(|hash| tables.transactions.get(hash).cloned()).collect())
    }

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: u32,
    ) -> Result<Vec<TransactionRecord>> {
        let hashes = self.fetch_all_transaction_hashes_in_ledger(sequence).await?;
        let tables = self.tables.read();
        let mut transactions = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let Some(record) = tables.transactions.get(&hash) else {
                return InvariantViolationSnafu {
                    message: format!(
                        "ledger {sequence} lists transaction {hash:02x?} but it is missing"
                    ),
                }
                .fail();
            };
            transactions.push(record.clone());
        }
        Ok(transactions)
    }

    async fn fetch_all_transaction_hashes_in_ledger(&self, sequence: u32) -> Result<Vec<Hash>> {
        let tables = self.tables.read();
        Ok(tables
            .ledger_transactions
            .get(&sequence)
            .map(|hashes| hashes.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn fetch_account_transactions(
        &self,
        account: &AccountId,
        limit: u32,
        forward: bool,
        cursor: Option<AccountTxCursor>,
    ) -> Result<AccountTxPage> {
        if limit == 0 {
            return Ok(AccountTxPage { transactions: Vec::new(), cursor: None });
        }
        let limit = limit as usize;
        let (entries, last_cursor) = {
            let tables = self.tables.read();
            let Some(index) = tables.account_tx.get(account) else {
                return Ok(AccountTxPage { transactions: Vec::new(), cursor: None });
            };
            let selected: Vec<(AccountTxCursor, Hash)> = if forward {
                let start = cursor.map_or(AccountTxCursor::new(0, 0), |c| c);
                index
                    .range((std::ops::Bound::Excluded(start), std::ops::Bound::Unbounded))
                    .take(limit)
                    .map(|(cursor, hash)| (*cursor, *hash))
                    .collect()
            } else {
                let end = cursor.map_or(AccountTxCursor::new(u32::MAX, u32::MAX), |c| c);
                index
                    .range(..end)
                    .rev()
                    .take(limit)
                    .map(|(cursor, hash)| (*cursor, *hash))
                    .collect()
            };
            let last = selected.last().map(|(cursor, _)| *cursor);
            (selected, last)
        };

        let hashes: Vec<Hash> = entries.iter().map(|(_, hash)| *hash).collect();
        let records = self.fetch_transactions(&hashes).await?;
        let mut transactions = Vec::with_capacity(records.len());
        for (hash, record) in hashes.iter().zip(records) {
            let Some(record) = record else {
                return InvariantViolationSnafu {
                    message: format!(
                        "account index lists transaction {hash:02x?} but it is missing"
                    ),
                }
                .fail();
            };
            transactions.push(record);
        }
        let cursor = if transactions.len() >= limit { last_cursor } else { None };
        Ok(AccountTxPage { transactions, cursor })
    }

    async fn fetch_ledger_diff(&self, sequence: u32) -> Result<Vec<LedgerObject>> {
        let keys: Vec<ObjectId> = {
            let tables = self.tables.read();
            tables
                .diffs
                .get(&sequence)
                .map(|keys| keys.iter().copied().collect())
                .unwrap_or_default()
        };
        let blobs = self.fetch_ledger_objects_uncached(&keys, sequence).await?;
        Ok(keys
            .into_iter()
            .zip(blobs)
            .map(|(key, blob)| LedgerObject { key, blob: blob.unwrap_or_default() })
            .collect())
    }

    async fn start_writes(&self) -> Result<()> {
        Ok(())
    }

    async fn store_ledger_object(&self, key: ObjectId, sequence: u32, blob: Blob) -> Result<()> {
        let mut tables = self.tables.write();
        tables.objects.entry(key).or_default().insert(sequence, blob);
        tables.diffs.entry(sequence).or_default().insert(key);
        Ok(())
    }

    async fn write_successor(
        &self,
        key: ObjectId,
        sequence: u32,
        successor: Option<ObjectId>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        tables.successors.entry(key).or_default().insert(sequence, successor);
        Ok(())
    }

    async fn write_ledger(&self, header: &LedgerHeader) -> Result<()> {
        let mut tables = self.tables.write();
        tables.ledger_hashes.insert(header.hash, header.sequence);
        tables.ledgers.insert(header.sequence, header.clone());
        Ok(())
    }

    async fn write_transaction(&self, record: TransactionRecord) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .ledger_transactions
            .entry(record.ledger_sequence)
            .or_default()
            .insert(record.hash);
        tables.transactions.insert(record.hash, record);
        Ok(())
    }

    async fn write_account_transactions(
        &self,
        data: Vec<AccountTransactionsData>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        for record in data {
            let cursor =
                AccountTxCursor::new(record.ledger_sequence, record.transaction_index);
            for account in record.accounts {
                tables
                    .account_tx
                    .entry(account)
                    .or_default()
                    .insert(cursor, record.transaction_hash);
            }
        }
        Ok(())
    }

    async fn commit_ledger(&self, sequence: u32) -> Result<()> {
        let mut tables = self.tables.write();
        if self.ledger_range().is_none()
            && (tables.committed_min.is_none() || tables.committed_min == Some(sequence))
        {
            tables.committed_min = Some(sequence);
        }
        let applied = match tables.committed_max {
            None => true,
            Some(max) => max + 1 == sequence,
        };
        if applied {
            tables.committed_max = Some(sequence);
            debug!(sequence, "committed ledger");
            Ok(())
        } else {
            CommitRejectedSnafu { sequence }.fail()
        }
    }

    async fn online_delete(&self, keep: u32) -> Result<()> {
        let Some(range) = self.hard_fetch_ledger_range().await? else {
            return Ok(());
        };
        let cutoff = range.max_sequence.saturating_sub(keep);
        if cutoff <= range.min_sequence {
            return Ok(());
        }

        let keys: BTreeSet<ObjectId> = {
            let tables = self.tables.read();
            tables
                .diffs
                .range(range.min_sequence..cutoff)
                .flat_map(|(_, keys)| keys.iter().copied())
                .collect()
        };

        let mut tables = self.tables.write();
        for key in keys {
            if let Some(versions) = tables.objects.get_mut(&key) {
                let surviving =
                    versions.range(..=cutoff).next_back().map(|(_, blob)| blob.clone());
                *versions = versions.split_off(&cutoff);
                if let Some(blob) = surviving.filter(|blob| !blob.is_empty()) {
                    versions.entry(cutoff).or_insert(blob);
                }
            }
            if let Some(versions) = tables.successors.get_mut(&key) {
                let surviving =
                    versions.range(..=cutoff).next_back().and_then(|(_, next)| *next);
                *versions = versions.split_off(&cutoff);
                if let Some(next) = surviving {
                    versions.entry(cutoff).or_insert(Some(next));
                }
            }
        }
        let stale: Vec<u32> =
            tables.diffs.range(range.min_sequence..cutoff).map(|(seq, _)| *seq).collect();
        for sequence in stale {
            tables.diffs.remove(&sequence);
        }
        tables.committed_min = Some(cutoff);
        drop(tables);

        if let Some(mut current) = self.ledger_range() {
            current.min_sequence = current.min_sequence.max(cutoff);
            self.set_ledger_range(current);
        }
        Ok(())
    }
}
