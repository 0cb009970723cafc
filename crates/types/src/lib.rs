//! Core type definitions for Chronicle.
//!
//! Chronicle is the storage-and-indexing core of a ledger history service:
//! it persists successive immutable ledger versions into a wide-column store
//! and serves point, range, and successor queries over historical state.
//! This crate holds the vocabulary shared by the storage layer and its
//! callers:
//!
//! - Key primitives: 256-bit object and account identifiers with the
//!   reserved iteration bookends, plus deterministic key derivation
//!   ([`keys`])
//! - Ledger entities: headers, state objects, transaction records, ranges,
//!   cursors, and the structured payloads the store decodes ([`types`])
//! - Postcard serialization with consistent error handling ([`codec`])
//! - Validated configuration for the store and its cache ([`config`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod keys;
pub mod types;

pub use codec::{decode, encode, CodecError};
pub use config::{CacheConfig, CassandraConfig, ConfigError};
pub use keys::{book_end, fees_key, keylet_page, AccountId, Hash, ObjectId};
pub use types::{
    AccountTransactionsData, AccountTxCursor, AccountTxPage, Blob, DirectoryPage, FeeSettings,
    LedgerHeader, LedgerObject, LedgerPage, LedgerRange, TransactionRecord,
};
