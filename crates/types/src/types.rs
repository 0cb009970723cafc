//! Ledger entity definitions.
//!
//! A ledger is an immutable snapshot of the whole key-value state at a
//! sequence. The store persists four kinds of records per ledger — state
//! objects, successor links, transactions, and the header — and makes a
//! ledger visible to readers atomically by advancing the committed
//! [`LedgerRange`].

use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode, CodecError};
use crate::keys::{AccountId, Hash, ObjectId};

/// Opaque serialized payload (object state, transaction body, metadata).
pub type Blob = Vec<u8>;

/// A state object at a point in time: its key and serialized state.
///
/// Inside a diff, an empty blob denotes deletion of the key at that
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerObject {
    /// Key of the object.
    pub key: ObjectId,
    /// Serialized state; empty when the diff entry is a deletion.
    pub blob: Blob,
}

impl LedgerObject {
    /// Builds an object record.
    pub fn new(key: ObjectId, blob: impl Into<Blob>) -> Self {
        Self { key, blob: blob.into() }
    }

    /// True when this diff entry removes the key.
    pub fn is_deletion(&self) -> bool {
        self.blob.is_empty()
    }
}

/// The contiguous inclusive window of ledger sequences that is fully
/// present and visible to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRange {
    /// Oldest visible sequence.
    pub min_sequence: u32,
    /// Newest visible sequence.
    pub max_sequence: u32,
}

impl LedgerRange {
    /// Builds a range; `min` and `max` are inclusive.
    pub fn new(min_sequence: u32, max_sequence: u32) -> Self {
        Self { min_sequence, max_sequence }
    }

    /// True when `sequence` falls inside the visible window.
    pub fn contains(&self, sequence: u32) -> bool {
        self.min_sequence <= sequence && sequence <= self.max_sequence
    }
}

/// Fixed metadata of one ledger version.
///
/// Stored as an opaque blob; [`LedgerHeader::to_blob`] /
/// [`LedgerHeader::from_blob`] own the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    /// Sequence of this ledger.
    pub sequence: u32,
    /// Hash identifying this ledger.
    pub hash: Hash,
    /// Hash of the parent ledger.
    pub parent_hash: Hash,
    /// Root hash over the ledger's transaction set.
    pub tx_hash: Hash,
    /// Root hash over the ledger's state object set.
    pub state_hash: Hash,
    /// Total coin supply after this ledger.
    pub total_coins: u64,
    /// Close time, seconds since the network epoch.
    pub close_time: u64,
    /// Parent ledger close time.
    pub parent_close_time: u64,
    /// Granularity of the close time in seconds.
    pub close_time_resolution: u8,
    /// Consensus close flags.
    pub close_flags: u8,
}

impl LedgerHeader {
    /// Serializes the header for storage.
    pub fn to_blob(&self) -> Result<Blob, CodecError> {
        encode(self)
    }

    /// Deserializes a stored header blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self, CodecError> {
        decode(blob)
    }
}

/// A transaction with its metadata and position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash.
    pub hash: Hash,
    /// Serialized transaction body.
    pub transaction: Blob,
    /// Serialized execution metadata.
    pub metadata: Blob,
    /// Sequence of the ledger that applied the transaction.
    pub ledger_sequence: u32,
    /// Close date of that ledger.
    pub date: u32,
}

/// Position of a transaction inside the account-ordered index, ordered
/// lexicographically by (ledger, index-within-ledger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountTxCursor {
    /// Ledger sequence.
    pub ledger_sequence: u32,
    /// Position of the transaction within that ledger.
    pub transaction_index: u32,
}

impl AccountTxCursor {
    /// Builds a cursor.
    pub fn new(ledger_sequence: u32, transaction_index: u32) -> Self {
        Self { ledger_sequence, transaction_index }
    }
}

/// One transaction's entries in the account index: which accounts it
/// touched and where it sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTransactionsData {
    /// Ledger that applied the transaction.
    pub ledger_sequence: u32,
    /// Position within that ledger.
    pub transaction_index: u32,
    /// Hash of the transaction.
    pub transaction_hash: Hash,
    /// Every account the transaction touched; one index row per account.
    pub accounts: Vec<AccountId>,
}

/// A page of an account's transaction history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTxPage {
    /// Transactions in cursor order.
    pub transactions: Vec<TransactionRecord>,
    /// Continuation cursor when more history remains.
    pub cursor: Option<AccountTxCursor>,
}

/// A page of state objects returned by a successor walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPage {
    /// Objects in key order.
    pub objects: Vec<LedgerObject>,
    /// Continuation cursor when the page filled up.
    pub cursor: Option<ObjectId>,
}

/// One page of an offer directory.
///
/// Directory pages form a linked list rooted at the book key; each page
/// lists the offer keys it holds and optionally the index of the next
/// page, from which the next page's key is derived.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryPage {
    /// Offer keys held by this page, in book order.
    pub indexes: Vec<ObjectId>,
    /// Index of the continuation page, if any.
    pub next_page: Option<u64>,
}

impl DirectoryPage {
    /// Serializes the page for storage.
    pub fn to_blob(&self) -> Result<Blob, CodecError> {
        encode(self)
    }

    /// Deserializes a stored directory page.
    pub fn from_blob(blob: &[u8]) -> Result<Self, CodecError> {
        decode(blob)
    }
}

/// Network fee settings read from the well-known fees object.
///
/// Every field is optional; a field missing from the stored object stays
/// absent rather than defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSettings {
    /// Base transaction cost.
    pub base: Option<u64>,
    /// Reference fee units.
    pub units: Option<u32>,
    /// Account reserve base.
    pub reserve: Option<u32>,
    /// Per-object reserve increment.
    pub increment: Option<u32>,
}

impl FeeSettings {
    /// Serializes the settings for storage.
    pub fn to_blob(&self) -> Result<Blob, CodecError> {
        encode(self)
    }

    /// Deserializes stored fee settings.
    pub fn from_blob(blob: &[u8]) -> Result<Self, CodecError> {
        decode(blob)
    }
}
