//! chronicle-store: the storage and indexing core of Chronicle.
//!
//! Chronicle ingests successive immutable ledger versions — headers,
//! transactions, and the full state object set — persists them into a
//! wide-column store, and serves point, range, and successor queries over
//! the historical state at any visible sequence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Backend trait                  │
//! │  (read-through pipeline, composite queries) │
//! └───────┬────────────────────────────┬────────┘
//!         │                            │
//! ┌───────▼────────┐          ┌────────▼─────────┐
//! │  ObjectCache   │          │  Successor index │
//! │ (snapshot map) │          │   maintenance    │
//! └───────┬────────┘          └────────┬─────────┘
//!         │                            │
//! ┌───────▼────────────────────────────▼────────┐
//! │     CassandraBackend / InMemoryBackend      │
//! │ (schema, prepared statements, write         │
//! │  pipeline, throttling, range commit)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Visibility model
//!
//! Object, successor, transaction, and header rows are append-only, keyed
//! by sequence. None of them is readable as part of a ledger until the
//! range commit for that ledger succeeds; the committed range row is the
//! single atomic visibility boundary. A loader drives the cycle:
//!
//! ```text
//! start_writes → write_ledger_object / write_successor /
//!                write_transaction / write_account_transactions /
//!                write_ledger → finish_writes(seq)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod successor;

pub use backend::cassandra::{Binding, CassandraBackend, RowReader};
pub use backend::memory::InMemoryBackend;
pub use backend::Backend;
pub use cache::ObjectCache;
pub use error::{Error, Result};
pub use successor::{apply_successor_updates, successor_updates, SuccessorUpdate};
