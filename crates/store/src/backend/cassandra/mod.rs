//! Cassandra/ScyllaDB-backed ledger store.
//!
//! ## Write pipeline
//!
//! Writes are fire-and-forget: each enqueued statement takes a permit from
//! the throttle semaphore (callers block once `max_requests_outstanding`
//! requests are in flight), bumps the in-flight counter, and runs on its
//! own task. A task that fails with a transient error resubmits the same
//! statement after an exponential backoff, holding its permit, forever; a
//! non-transient error aborts the process, because it signals a schema or
//! logic bug and dropping the write would lose data. The drain signal
//! fires when the counter reaches zero.
//!
//! ## Commit protocol
//!
//! [`Backend::commit_ledger`] waits for the drain, then advances the
//! `ledger_range` row with a conditional update fenced on the previous
//! sequence. That single row is the visibility boundary: readers observe
//! either the previous ledger or the new one, never a partial write. A
//! conditional update that times out is treated as applied — the retry may
//! have landed invisibly, and the single-writer loader converges either
//! way.
//!
//! ## Lifecycle
//!
//! `Closed → Opening → Open → Closing → Closed`. Opening connects,
//! creates missing schema (unless read-only), and prepares every
//! statement; the prepared set is immutable afterwards. Reads and writes
//! are only legal in `Open`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronicle_types::{
    AccountId, AccountTransactionsData, AccountTxCursor, AccountTxPage, Blob, CacheConfig,
    CassandraConfig, Hash, LedgerHeader, LedgerObject, LedgerRange, ObjectId, TransactionRecord,
};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::{Mutex, RwLock};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::prepared_statement::PreparedStatement;
use scylla::statement::Consistency;
use scylla::transport::errors::{DbError, QueryError};
use scylla::{QueryResult, Session, SessionBuilder};
use snafu::ResultExt;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::cache::ObjectCache;
use crate::error::{
    CommitRejectedSnafu, ConnectSnafu, Error, InvariantViolationSnafu, Result, TimeoutSnafu,
};

mod schema;
mod statement;

pub use statement::{Binding, RowReader};

use schema::Queries;

/// Delay before the first retry of a failed statement.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Upper bound on the retry backoff.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Page size for the statements that return many rows per ledger.
const SCAN_PAGE_SIZE: i32 = 10_000;

/// Lifecycle states of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Transient driver failures: retried on the write path, surfaced as
/// [`Error::Timeout`] by the sync read primitive.
fn is_timeout(error: &QueryError) -> bool {
    match error {
        QueryError::TimeoutError | QueryError::RequestTimeout(_) => true,
        QueryError::IoError(_) => true,
        QueryError::DbError(db, _) => matches!(
            db,
            DbError::Unavailable { .. }
                | DbError::Overloaded
                | DbError::ReadTimeout { .. }
                | DbError::WriteTimeout { .. }
        ),
        _ => false,
    }
}

/// The prepared statement set, immutable after open.
struct Statements {
    insert_object: PreparedStatement,
    insert_successor: PreparedStatement,
    insert_diff: PreparedStatement,
    insert_transaction: PreparedStatement,
    insert_ledger_transaction: PreparedStatement,
    insert_account_tx: PreparedStatement,
    insert_ledger_header: PreparedStatement,
    insert_ledger_hash: PreparedStatement,
    update_ledger_range: PreparedStatement,
    update_ledger_range_min: PreparedStatement,
    select_object: PreparedStatement,
    select_successor: PreparedStatement,
    select_diff: PreparedStatement,
    select_transaction: PreparedStatement,
    select_ledger_transactions: PreparedStatement,
    select_account_tx: PreparedStatement,
    select_account_tx_forward: PreparedStatement,
    select_ledger_by_sequence: PreparedStatement,
    select_ledger_by_hash: PreparedStatement,
    select_latest_ledger: PreparedStatement,
    select_ledger_range: PreparedStatement,
    delete_object_history: PreparedStatement,
    delete_successor_history: PreparedStatement,
    delete_diff: PreparedStatement,
}

impl Statements {
    async fn prepare(session: &Session, queries: &Queries) -> Result<Self> {
        Ok(Self {
            insert_object: prepare(session, &queries.insert_object, false).await?,
            insert_successor: prepare(session, &queries.insert_successor, false).await?,
            insert_diff: prepare(session, &queries.insert_diff, false).await?,
            insert_transaction: prepare(session, &queries.insert_transaction, false).await?,
            insert_ledger_transaction: prepare(session, &queries.insert_ledger_transaction, false)
                .await?,
            insert_account_tx: prepare(session, &queries.insert_account_tx, false).await?,
            insert_ledger_header: prepare(session, &queries.insert_ledger_header, false).await?,
            insert_ledger_hash: prepare(session, &queries.insert_ledger_hash, false).await?,
            update_ledger_range: prepare(session, &queries.update_ledger_range, false).await?,
            update_ledger_range_min: prepare(session, &queries.update_ledger_range_min, false)
                .await?,
            select_object: prepare(session, &queries.select_object, false).await?,
            select_successor: prepare(session, &queries.select_successor, false).await?,
            select_diff: prepare(session, &queries.select_diff, true).await?,
            select_transaction: prepare(session, &queries.select_transaction, false).await?,
            select_ledger_transactions: prepare(session, &queries.select_ledger_transactions, true)
                .await?,
            select_account_tx: prepare(session, &queries.select_account_tx, true).await?,
            select_account_tx_forward: prepare(session, &queries.select_account_tx_forward, true)
                .await?,
            select_ledger_by_sequence: prepare(session, &queries.select_ledger_by_sequence, false)
                .await?,
            select_ledger_by_hash: prepare(session, &queries.select_ledger_by_hash, false).await?,
            select_latest_ledger: prepare(session, &queries.select_latest_ledger, false).await?,
            select_ledger_range: prepare(session, &queries.select_ledger_range, false).await?,
            delete_object_history: prepare(session, &queries.delete_object_history, false).await?,
            delete_successor_history: prepare(session, &queries.delete_successor_history, false)
                .await?,
            delete_diff: prepare(session, &queries.delete_diff, false).await?,
        })
    }
}

async fn prepare(session: &Session, query: &str, scan: bool) -> Result<PreparedStatement> {
    let mut prepared = session.prepare(query).await.map_err(|error| Error::Query {
        message: format!("failed to prepare `{query}`: {error}"),
    })?;
    prepared.set_consistency(Consistency::Quorum);
    if scan {
        prepared.set_page_size(SCAN_PAGE_SIZE);
    }
    Ok(prepared)
}

/// Session and prepared statements, shared by in-flight write tasks.
struct Inner {
    session: Session,
    statements: Statements,
}

/// Cassandra/ScyllaDB implementation of [`Backend`].
pub struct CassandraBackend {
    config: CassandraConfig,
    cache: ObjectCache,
    range: RwLock<Option<LedgerRange>>,
    state: Mutex<Lifecycle>,
    inner: RwLock<Option<Arc<Inner>>>,
    /// Counting semaphore bounding foreground in-flight writes.
    throttle: Arc<Semaphore>,
    /// Writes submitted but not yet completed. Kept separate from the
    /// throttle: the drain wait needs a zero-crossing signal, not permits.
    in_flight: Arc<AtomicU32>,
    drain: Arc<Notify>,
}

impl CassandraBackend {
    /// Creates a closed store; call [`Backend::open`] before use.
    pub fn new(config: CassandraConfig, cache: CacheConfig) -> Self {
        let throttle = Arc::new(Semaphore::new(config.max_requests_outstanding as usize));
        Self {
            cache: ObjectCache::new(cache.window),
            range: RwLock::new(None),
            state: Mutex::new(Lifecycle::Closed),
            inner: RwLock::new(None),
            throttle,
            in_flight: Arc::new(AtomicU32::new(0)),
            drain: Arc::new(Notify::new()),
            config,
        }
    }

    /// True while the store is open.
    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), Lifecycle::Open)
    }

    fn inner(&self) -> Result<Arc<Inner>> {
        self.inner.read().clone().ok_or(Error::Closed)
    }

    async fn connect(&self, read_only: bool) -> Result<Inner> {
        let nodes: Vec<String> = self
            .config
            .contact_points
            .iter()
            .map(|host| format!("{host}:{}", self.config.port))
            .collect();
        let mut builder = SessionBuilder::new().known_nodes(&nodes);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            builder = builder.user(username, password);
        }
        let session = builder.build().await.context(ConnectSnafu)?;

        if !read_only {
            run_ddl(&session, &schema::create_keyspace(&self.config)).await?;
            for ddl in schema::create_tables(&self.config) {
                run_ddl(&session, &ddl).await?;
            }
        }

        let statements = Statements::prepare(&session, &Queries::new(&self.config)).await?;
        Ok(Inner { session, statements })
    }

    /// Submits a write to the async pipeline. Blocks on the throttle when
    /// the in-flight budget is exhausted; the spawned task retries
    /// transient failures forever and aborts the process on anything else.
    async fn submit_write(
        &self,
        statement: PreparedStatement,
        values: Vec<CqlValue>,
    ) -> Result<()> {
        let inner = self.inner()?;
        let permit = Arc::clone(&self.throttle)
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = Arc::clone(&self.in_flight);
        let drain = Arc::clone(&self.drain);
        tokio::spawn(async move {
            let _permit = permit;
            let mut backoff = RETRY_BACKOFF_BASE;
            loop {
                match inner.session.execute(&statement, &values).await {
                    Ok(_) => break,
                    Err(error) if is_timeout(&error) => {
                        warn!(%error, "async write timed out; resubmitting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                    }
                    Err(error) => {
                        error!(%error, "unrecoverable write error");
                        std::process::abort();
                    }
                }
            }
            if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                drain.notify_waiters();
            }
        });
        Ok(())
    }

    /// Waits until every submitted write has completed.
    async fn sync(&self) {
        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            // The waiter must be registered before the counter is
            // re-checked; `notify_waiters` wakes only registered waiters,
            // so a completion landing between the check and the await
            // would otherwise be lost.
            let notified = self.drain.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Executes a statement synchronously, retrying every failure until
    /// the server accepts it. Used only where losing the write is not an
    /// option (range commit, online delete).
    async fn execute_sync_write(
        &self,
        inner: &Inner,
        statement: &PreparedStatement,
        values: &[CqlValue],
    ) {
        loop {
            match inner.session.execute(statement, values).await {
                Ok(_) => return,
                Err(error) => {
                    warn!(%error, "sync write failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF_BASE).await;
                }
            }
        }
    }

    /// Executes a conditional update, retrying failures, and reports
    /// whether it was applied.
    ///
    /// Returns `true` when the server reports applied **or** any attempt
    /// failed along the way: a lost response may hide an applied update,
    /// and a retry of our own write is indistinguishable from another
    /// writer. Callers must be idempotent under this rule.
    async fn execute_sync_update(
        &self,
        inner: &Inner,
        statement: &PreparedStatement,
        values: &[CqlValue],
    ) -> Result<bool> {
        let mut failed = false;
        let result = loop {
            match inner.session.execute(statement, values).await {
                Ok(result) => break result,
                Err(error) => {
                    failed = true;
                    warn!(%error, "conditional update failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF_BASE).await;
                }
            }
        };
        let Some(row) = first_row(&result) else {
            warn!("conditional update returned no rows");
            return Ok(false);
        };
        let applied = RowReader::new(row).bool()?;
        if !applied && failed {
            warn!("conditional update not applied, but an attempt timed out; assuming applied");
        }
        Ok(applied || failed)
    }

    /// Executes a read, retrying until the server answers. Transient
    /// failures surface as [`Error::Timeout`] so callers that know the
    /// read is safe to repeat can do so from a higher level.
    async fn execute_sync_read(
        &self,
        inner: &Inner,
        statement: &PreparedStatement,
        values: &[CqlValue],
    ) -> Result<QueryResult> {
        loop {
            match inner.session.execute(statement, values).await {
                Ok(result) => return Ok(result),
                Err(error) if is_timeout(&error) => {
                    return TimeoutSnafu { message: error.to_string() }.fail();
                }
                Err(QueryError::BadQuery(bad)) => {
                    return Err(Error::Query { message: bad.to_string() });
                }
                Err(error) => {
                    error!(%error, "sync read failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF_BASE).await;
                }
            }
        }
    }

    /// Rewrites one key's surviving state at the cutoff and removes its
    /// older history.
    async fn compact_key(&self, inner: &Inner, key: ObjectId, cutoff: u32) -> Result<()> {
        if let Some(blob) = self.fetch_ledger_object_uncached(&key, cutoff).await? {
            let values =
                Binding::new().key(&key).sequence(cutoff).bytes(&blob).finish();
            self.execute_sync_write(inner, &inner.statements.insert_object, &values).await;
        }
        if let Some(next) = self.fetch_successor_raw(inner, &key, cutoff).await? {
            let values = Binding::new().key(&key).sequence(cutoff).bytes(&next).finish();
            self.execute_sync_write(inner, &inner.statements.insert_successor, &values).await;
        }

        let values = Binding::new().key(&key).sequence(cutoff).finish();
        self.execute_sync_write(inner, &inner.statements.delete_object_history, &values).await;
        let values = Binding::new().key(&key).sequence(cutoff).finish();
        self.execute_sync_write(inner, &inner.statements.delete_successor_history, &values).await;
        Ok(())
    }

    /// The raw successor cell for `key` at `sequence`, sentinel and
    /// tombstone values included. `None` when no row exists or the link is
    /// tombstoned.
    async fn fetch_successor_raw(
        &self,
        inner: &Inner,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<Vec<u8>>> {
        let values = Binding::new().key(key).sequence(sequence).finish();
        let result =
            self.execute_sync_read(inner, &inner.statements.select_successor, &values).await?;
        let Some(row) = first_row(&result) else {
            return Ok(None);
        };
        let next = RowReader::new(row).bytes()?;
        Ok(if next.is_empty() { None } else { Some(next) })
    }
}

async fn run_ddl(session: &Session, ddl: &str) -> Result<()> {
    session.query(ddl, ()).await.map_err(|error| Error::Query {
        message: format!("schema statement failed: {error}"),
    })?;
    Ok(())
}

fn rows(result: &QueryResult) -> &[Row] {
    result.rows.as_deref().unwrap_or(&[])
}

fn first_row(result: &QueryResult) -> Option<&Row> {
    rows(result).first()
}

#[async_trait]
impl Backend for CassandraBackend {
    fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    fn ledger_range(&self) -> Option<LedgerRange> {
        *self.range.read()
    }

    fn set_ledger_range(&self, range: LedgerRange) {
        *self.range.write() = Some(range);
    }

    async fn open(&self, read_only: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Closed {
                return InvariantViolationSnafu {
                    message: format!("open() while {:?}", *state),
                }
                .fail();
            }
            *state = Lifecycle::Opening;
        }
        match self.connect(read_only).await {
            Ok(inner) => {
                *self.inner.write() = Some(Arc::new(inner));
                *self.state.lock() = Lifecycle::Open;
                info!(keyspace = %self.config.keyspace, read_only, "store opened");
                Ok(())
            }
            Err(error) => {
                *self.state.lock() = Lifecycle::Closed;
                Err(error)
            }
        }
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Open {
                return;
            }
            *state = Lifecycle::Closing;
        }
        self.sync().await;
        *self.inner.write() = None;
        *self.state.lock() = Lifecycle::Closed;
        info!("store closed");
    }

    async fn fetch_ledger_object_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<Blob>> {
        let inner = self.inner()?;
        let values = Binding::new().key(key).sequence(sequence).finish();
        let result =
            self.execute_sync_read(&inner, &inner.statements.select_object, &values).await?;
        let Some(row) = first_row(&result) else {
            return Ok(None);
        };
        let blob = RowReader::new(row).bytes()?;
        Ok(if blob.is_empty() { None } else { Some(blob) })
    }

    async fn fetch_ledger_objects_uncached(
        &self,
        keys: &[ObjectId],
        sequence: u32,
    ) -> Result<Vec<Option<Blob>>> {
        try_join_all(keys.iter().map(|key| self.fetch_ledger_object_uncached(key, sequence)))
            .await
    }

    async fn fetch_successor_key_uncached(
        &self,
        key: &ObjectId,
        sequence: u32,
    ) -> Result<Option<ObjectId>> {
        let inner = self.inner()?;
        let Some(next) = self.fetch_successor_raw(&inner, key, sequence).await? else {
            return Ok(None);
        };
        let next = ObjectId::from_slice(&next).ok_or_else(|| Error::Decode {
            message: format!("successor of {key} holds {} bytes", next.len()),
        })?;
        Ok(if next == ObjectId::LAST { None } else { Some(next) })
    }

    async fn fetch_latest_ledger_sequence(&self) -> Result<Option<u32>> {
        let inner = self.inner()?;
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_latest_ledger, &[])
            .await?;
        match first_row(&result) {
            Some(row) => Ok(Some(RowReader::new(row).sequence()?)),
            None => Ok(None),
        }
    }

    async fn fetch_ledger_by_sequence(&self, sequence: u32) -> Result<Option<LedgerHeader>> {
        let inner = self.inner()?;
        let values = Binding::new().sequence(sequence).finish();
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_ledger_by_sequence, &values)
            .await?;
        let Some(row) = first_row(&result) else {
            return Ok(None);
        };
        let header = RowReader::new(row).bytes()?;
        Ok(Some(LedgerHeader::from_blob(&header)?))
    }

    async fn fetch_ledger_by_hash(&self, hash: &Hash) -> Result<Option<LedgerHeader>> {
        let inner = self.inner()?;
        let values = Binding::new().hash(hash).finish();
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_ledger_by_hash, &values)
            .await?;
        let Some(row) = first_row(&result) else {
            return Ok(None);
        };
        let sequence = RowReader::new(row).sequence()?;
        self.fetch_ledger_by_sequence(sequence).await
    }

    async fn hard_fetch_ledger_range(&self) -> Result<Option<LedgerRange>> {
        let inner = self.inner()?;
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_ledger_range, &[])
            .await?;
        let mut sequences = Vec::new();
        for row in rows(&result) {
            let mut reader = RowReader::new(row);
            let _is_latest = reader.bool()?;
            sequences.push(reader.sequence()?);
        }
        let (Some(min), Some(max)) =
            (sequences.iter().min().copied(), sequences.iter().max().copied())
        else {
            return Ok(None);
        };
        Ok(Some(LedgerRange::new(min, max)))
    }

    async fn fetch_transaction(&self, hash: &Hash) -> Result<Option<TransactionRecord>> {
        let inner = self.inner()?;
        let values = Binding::new().hash(hash).finish();
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_transaction, &values)
            .await?;
        let Some(row) = first_row(&result) else {
            return Ok(None);
        };
        let mut reader = RowReader::new(row);
        let transaction = reader.bytes()?;
        let metadata = reader.bytes()?;
        let ledger_sequence = reader.sequence()?;
        let date = reader.sequence()?;
        Ok(Some(TransactionRecord { hash: *hash, transaction, metadata, ledger_sequence, date }))
    }

    async fn fetch_transactions(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<Option<TransactionRecord>>> {
        try_join_all(hashes.iter().map(|hash| self.fetch_transaction(hash))).await
    }

    async fn fetch_all_transactions_in_ledger(
        &self,
        sequence: u32,
    ) -> Result<Vec<TransactionRecord>> {
        let hashes = self.fetch_all_transaction_hashes_in_ledger(sequence).await?;
        let records = self.fetch_transactions(&hashes).await?;
        let mut transactions = Vec::with_capacity(records.len());
        for (hash, record) in hashes.iter().zip(records) {
            let Some(record) = record else {
                return InvariantViolationSnafu {
                    message: format!(
                        "ledger {sequence} lists transaction {hash:02x?} but it is missing"
                    ),
                }
                .fail();
            };
            transactions.push(record);
        }
        Ok(transactions)
    }

    async fn fetch_all_transaction_hashes_in_ledger(&self, sequence: u32) -> Result<Vec<Hash>> {
        let inner = self.inner()?;
        let values = Binding::new().sequence(sequence).finish();
        let result = self
            .execute_sync_read(&inner, &inner.statements.select_ledger_transactions, &values)
            .await?;
        rows(&result).iter().map(|row| RowReader::new(row).hash()).collect()
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
        let inner = self.inner()?;
        let (statement, bound) = if forward {
            let bound = cursor.map_or((0, 0), |c| {
                (i64::from(c.ledger_sequence), i64::from(c.transaction_index))
            });
            (&inner.statements.select_account_tx_forward, bound)
        } else {
            let bound = cursor.map_or((i64::MAX, i64::MAX), |c| {
                (i64::from(c.ledger_sequence), i64::from(c.transaction_index))
            });
            (&inner.statements.select_account_tx, bound)
        };
        let values = Binding::new()
            .account(account)
            .tuple(bound.0, bound.1)
            .limit(limit)
            .finish();
        let result = self.execute_sync_read(&inner, statement, &values).await?;

        let mut hashes = Vec::new();
        let mut last_cursor = None;
        for row in rows(&result) {
            let mut reader = RowReader::new(row);
            hashes.push(reader.hash()?);
            let (ledger_sequence, transaction_index) = reader.tuple()?;
            last_cursor = Some(AccountTxCursor::new(
                u32::try_from(ledger_sequence).unwrap_or_default(),
                u32::try_from(transaction_index).unwrap_or_default(),
            ));
        }
        let next_cursor = if hashes.len() as u32 >= limit { last_cursor } else { None };

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
        Ok(AccountTxPage { transactions, cursor: next_cursor })
    }

    async fn fetch_ledger_diff(&self, sequence: u32) -> Result<Vec<LedgerObject>> {
        let inner = self.inner()?;
        let values = Binding::new().sequence(sequence).finish();
        let result =
            self.execute_sync_read(&inner, &inner.statements.select_diff, &values).await?;
        let keys: Vec<ObjectId> =
            rows(&result).iter().map(|row| RowReader::new(row).key()).collect::<Result<_>>()?;
        let blobs = self.fetch_ledger_objects_uncached(&keys, sequence).await?;
        Ok(keys
            .into_iter()
            .zip(blobs)
            .map(|(key, blob)| LedgerObject { key, blob: blob.unwrap_or_default() })
            .collect())
    }

    async fn start_writes(&self) -> Result<()> {
        // The session stays open between ledgers; nothing to do.
        self.inner().map(|_| ())
    }

    async fn store_ledger_object(&self, key: ObjectId, sequence: u32, blob: Blob) -> Result<()> {
        let inner = self.inner()?;
        let values = Binding::new().key(&key).sequence(sequence).bytes(&blob).finish();
        self.submit_write(inner.statements.insert_object.clone(), values).await?;
        let values = Binding::new().sequence(sequence).key(&key).finish();
        self.submit_write(inner.statements.insert_diff.clone(), values).await
    }

    async fn write_successor(
        &self,
        key: ObjectId,
        sequence: u32,
        successor: Option<ObjectId>,
    ) -> Result<()> {
        let inner = self.inner()?;
        let next = successor.map(|id| id.as_bytes().to_vec()).unwrap_or_default();
        let values = Binding::new().key(&key).sequence(sequence).bytes(&next).finish();
        self.submit_write(inner.statements.insert_successor.clone(), values).await
    }

    async fn write_ledger(&self, header: &LedgerHeader) -> Result<()> {
        let inner = self.inner()?;
        let blob = header.to_blob()?;
        let values = Binding::new().sequence(header.sequence).bytes(&blob).finish();
        self.submit_write(inner.statements.insert_ledger_header.clone(), values).await?;
        let values = Binding::new().hash(&header.hash).sequence(header.sequence).finish();
        self.submit_write(inner.statements.insert_ledger_hash.clone(), values).await
    }

    async fn write_transaction(&self, record: TransactionRecord) -> Result<()> {
        let inner = self.inner()?;
        let values = Binding::new()
            .hash(&record.hash)
            .sequence(record.ledger_sequence)
            .sequence(record.date)
            .bytes(&record.transaction)
            .bytes(&record.metadata)
            .finish();
        self.submit_write(inner.statements.insert_transaction.clone(), values).await?;
        let values =
            Binding::new().sequence(record.ledger_sequence).hash(&record.hash).finish();
        self.submit_write(inner.statements.insert_ledger_transaction.clone(), values).await
    }

    async fn write_account_transactions(
        &self,
        data: Vec<AccountTransactionsData>,
    ) -> Result<()> {
        let inner = self.inner()?;
        for record in data {
            for account in &record.accounts {
                let values = Binding::new()
                    .account(account)
                    .tuple(
                        i64::from(record.ledger_sequence),
                        i64::from(record.transaction_index),
                    )
                    .hash(&record.transaction_hash)
                    .finish();
                self.submit_write(inner.statements.insert_account_tx.clone(), values).await?;
            }
        }
        Ok(())
    }

    async fn commit_ledger(&self, sequence: u32) -> Result<()> {
        let inner = self.inner()?;
        self.sync().await;

        if self.ledger_range().is_none() {
            let values =
                Binding::new().sequence(sequence).bool(false).sequence(sequence).finish();
            self.execute_sync_write(&inner, &inner.statements.update_ledger_range, &values)
                .await;
        }

        let previous = sequence.saturating_sub(1);
        let values = Binding::new().sequence(sequence).bool(true).sequence(previous).finish();
        let applied = self
            .execute_sync_update(&inner, &inner.statements.update_ledger_range, &values)
            .await?;
        if applied {
            debug!(sequence, "committed ledger");
            Ok(())
        } else {
            CommitRejectedSnafu { sequence }.fail()
        }
    }

    async fn online_delete(&self, keep: u32) -> Result<()> {
        let inner = self.inner()?;
        let Some(range) = self.hard_fetch_ledger_range().await? else {
            return Ok(());
        };
        let cutoff = range.max_sequence.saturating_sub(keep);
        if cutoff <= range.min_sequence {
            return Ok(());
        }
        info!(cutoff, min = range.min_sequence, "online delete starting");

        let mut keys = std::collections::BTreeSet::new();
        for sequence in range.min_sequence..cutoff {
            let values = Binding::new().sequence(sequence).finish();
            let result =
                self.execute_sync_read(&inner, &inner.statements.select_diff, &values).await?;
            for row in rows(&result) {
                keys.insert(RowReader::new(row).key()?);
            }
        }

        let budget = self.config.indexer_max_requests_outstanding as usize;
        stream::iter(keys.into_iter().map(|key| self.compact_key(&inner, key, cutoff)))
            .buffer_unordered(budget)
            .try_collect::<Vec<()>>()
            .await?;

        for sequence in range.min_sequence..cutoff {
            let values = Binding::new().sequence(sequence).finish();
            self.execute_sync_write(&inner, &inner.statements.delete_diff, &values).await;
        }

        let values = Binding::new().sequence(cutoff).finish();
        self.execute_sync_write(&inner, &inner.statements.update_ledger_range_min, &values)
            .await;

        if let Some(mut current) = self.ledger_range() {
            current.min_sequence = current.min_sequence.max(cutoff);
            self.set_ledger_range(current);
        }
        info!(cutoff, "online delete finished");
        Ok(())
    }
}
