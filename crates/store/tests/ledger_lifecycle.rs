//! End-to-end tests of the write/commit/read cycle.
//!
//! These tests drive the full pipeline the loader uses in production —
//! object writes, successor maintenance from the previous snapshot, the
//! header write, and the range commit — against the in-memory backend,
//! then verify every read surface: point lookups, successor walks, pages,
//! book offers, diffs, transactions, account history, and retention.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chronicle_store::{apply_successor_updates, Backend, InMemoryBackend};
use chronicle_types::{
    book_end, fees_key, keylet_page, AccountId, AccountTransactionsData, AccountTxCursor,
    DirectoryPage, FeeSettings, Hash, LedgerHeader, LedgerObject, LedgerRange, ObjectId,
    TransactionRecord,
};

fn key(fill: u8) -> ObjectId {
    ObjectId::new([fill; 32])
}

fn hash(fill: u8) -> Hash {
    [fill; 32]
}

fn account(fill: u8) -> AccountId {
    AccountId::new([fill; 32])
}

fn header(sequence: u32) -> LedgerHeader {
    LedgerHeader {
        sequence,
        hash: hash(sequence as u8),
        parent_hash: hash(sequence.wrapping_sub(1) as u8),
        tx_hash: [0x11; 32],
        state_hash: [0x22; 32],
        total_coins: 100_000_000,
        close_time: 700_000_000 + u64::from(sequence),
        parent_close_time: 700_000_000 + u64::from(sequence) - 1,
        close_time_resolution: 10,
        close_flags: 0,
    }
}

/// Writes the base ledger: the full object set, the complete successor
/// chain, the header, and the range commit. Primes the cache with the
/// resulting snapshot.
async fn write_base_ledger(
    backend: &InMemoryBackend,
    sequence: u32,
    objects: &[(ObjectId, Vec<u8>)],
) {
    let mut sorted: Vec<(ObjectId, Vec<u8>)> = objects.to_vec();
    sorted.sort();

    backend.start_writes().await.expect("start");
    for (key, blob) in &sorted {
        backend.write_ledger_object(*key, sequence, blob.clone()).await.expect("object");
    }
    let mut previous = ObjectId::FIRST;
    for (key, _) in &sorted {
        backend.write_successor(previous, sequence, Some(*key)).await.expect("successor");
        previous = *key;
    }
    backend.write_successor(previous, sequence, Some(ObjectId::LAST)).await.expect("successor");
    backend.write_ledger(&header(sequence)).await.expect("header");
    assert!(backend.finish_writes(sequence).await.expect("commit"));

    let snapshot =
        sorted.into_iter().map(|(key, blob)| LedgerObject::new(key, blob)).collect();
    backend.cache().initialize(snapshot, sequence);
}

/// Applies one ledger diff the way the loader does: successor updates are
/// computed against the previous snapshot, then the cache advances, then
/// everything is written and committed.
async fn apply_ledger(backend: &InMemoryBackend, sequence: u32, diff: &[LedgerObject]) -> bool {
    backend.start_writes().await.expect("start");
    apply_successor_updates(backend, diff, sequence).await.expect("successor updates");
    backend.cache().update(diff, sequence).expect("cache update");
    for object in diff {
        backend
            .write_ledger_object(object.key, sequence, object.blob.clone())
            .await
            .expect("object");
    }
    backend.write_ledger(&header(sequence)).await.expect("header");
    backend.finish_writes(sequence).await.expect("commit")
}

/// Walks the successor chain from the lower bookend and returns the keys
/// in order.
async fn walk(backend: &InMemoryBackend, sequence: u32) -> Vec<ObjectId> {
    let mut keys = Vec::new();
    let mut cursor = ObjectId::FIRST;
    while let Some(next) =
        backend.fetch_successor_key(&cursor, sequence).await.expect("successor")
    {
        keys.push(next);
        cursor = next;
        assert!(keys.len() <= 1024, "successor walk did not terminate");
    }
    keys
}

// ============================================================================
// Empty store
// ============================================================================

#[tokio::test]
async fn test_empty_store_has_no_range() {
    let backend = InMemoryBackend::default();
    assert_eq!(backend.fetch_latest_ledger_sequence().await.unwrap(), None);
    assert_eq!(backend.hard_fetch_ledger_range().await.unwrap(), None);
    assert_eq!(backend.hard_fetch_ledger_range_no_throw().await.unwrap(), None);
    assert_eq!(backend.fetch_successor_key(&ObjectId::FIRST, 100).await.unwrap(), None);
    assert!(backend.fetch_ledger_objects(&[], 100).await.unwrap().is_empty());
}

// ============================================================================
// Base ledger and historical reads
// ============================================================================

#[tokio::test]
async fn test_base_ledger_commit_and_reads() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec()), (key(0xB0), b"\xBB".to_vec())]).await;

    assert_eq!(backend.fetch_latest_ledger_sequence().await.unwrap(), Some(100));
    assert_eq!(
        backend.hard_fetch_ledger_range().await.unwrap(),
        Some(LedgerRange::new(100, 100))
    );
    assert_eq!(
        backend.fetch_successor_key(&ObjectId::FIRST, 100).await.unwrap(),
        Some(key(0xA0))
    );
    assert_eq!(backend.fetch_successor_key(&key(0xA0), 100).await.unwrap(), Some(key(0xB0)));
    assert_eq!(backend.fetch_successor_key(&key(0xB0), 100).await.unwrap(), None);
    assert_eq!(backend.fetch_successor_key(&ObjectId::LAST, 100).await.unwrap(), None);
    assert_eq!(
        backend.fetch_ledger_object(&key(0xB0), 100).await.unwrap(),
        Some(b"\xBB".to_vec())
    );
    assert_eq!(walk(&backend, 100).await, vec![key(0xA0), key(0xB0)]);
}

#[tokio::test]
async fn test_deletion_is_visible_only_from_its_sequence() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec()), (key(0xB0), b"\xBB".to_vec())]).await;

    let diff = vec![LedgerObject::new(key(0xA0), Vec::new())];
    assert!(apply_ledger(&backend, 101, &diff).await);

    assert_eq!(backend.fetch_ledger_object(&key(0xA0), 101).await.unwrap(), None);
    assert_eq!(
        backend.fetch_ledger_object(&key(0xA0), 100).await.unwrap(),
        Some(b"\xAA".to_vec())
    );
    assert_eq!(
        backend.fetch_successor_key(&ObjectId::FIRST, 101).await.unwrap(),
        Some(key(0xB0))
    );
    assert_eq!(walk(&backend, 101).await, vec![key(0xB0)]);
    assert_eq!(walk(&backend, 100).await, vec![key(0xA0), key(0xB0)]);
}

#[tokio::test]
async fn test_object_value_is_newest_at_or_below_query_sequence() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"v1".to_vec())]).await;
    assert!(apply_ledger(&backend, 101, &[]).await);
    assert!(
        apply_ledger(&backend, 102, &[LedgerObject::new(key(0xA0), b"v2".to_vec())]).await
    );

    // Bypass the cache to exercise the stored history as well.
    for sequence in [100, 101] {
        assert_eq!(
            backend.fetch_ledger_object_uncached(&key(0xA0), sequence).await.unwrap(),
            Some(b"v1".to_vec())
        );
    }
    assert_eq!(
        backend.fetch_ledger_object_uncached(&key(0xA0), 102).await.unwrap(),
        Some(b"v2".to_vec())
    );
}

// ============================================================================
// Commit protocol
// ============================================================================

#[tokio::test]
async fn test_commit_rejected_on_sequence_gap() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec())]).await;
    assert!(apply_ledger(&backend, 101, &[]).await);

    // Skipping 102 must be refused, and the refused ledger stays invisible.
    backend.start_writes().await.unwrap();
    backend.write_ledger(&header(103)).await.unwrap();
    assert!(!backend.finish_writes(103).await.unwrap());
    assert_eq!(backend.fetch_latest_ledger_sequence().await.unwrap(), Some(101));
    assert_eq!(backend.ledger_range(), Some(LedgerRange::new(100, 101)));

    // The next in-order commit still goes through.
    assert!(apply_ledger(&backend, 102, &[]).await);
    assert_eq!(backend.fetch_latest_ledger_sequence().await.unwrap(), Some(102));
}

#[tokio::test]
async fn test_recommitting_the_same_sequence_is_rejected() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec())]).await;
    assert!(!backend.finish_writes(100).await.unwrap());
}

// ============================================================================
// Sentinels and invariants
// ============================================================================

#[tokio::test]
async fn test_sentinel_object_writes_are_rejected() {
    let backend = InMemoryBackend::default();
    for sentinel in [ObjectId::FIRST, ObjectId::LAST] {
        let result = backend.write_ledger_object(sentinel, 100, b"x".to_vec()).await;
        assert!(matches!(result, Err(chronicle_store::Error::InvariantViolation { .. })));
    }
}

#[tokio::test]
async fn test_successor_link_to_missing_object_is_fatal() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec())]).await;
    // Corrupt the index: a link pointing at a key with no object.
    backend.write_successor(key(0xA0), 100, Some(key(0xE0))).await.unwrap();
    backend.cache().initialize(Vec::new(), 100);

    let result = backend.fetch_successor_object(&key(0xA0), 100).await;
    assert!(matches!(result, Err(chronicle_store::Error::InvariantViolation { .. })));
}

// ============================================================================
// Batched reads
// ============================================================================

#[tokio::test]
async fn test_batched_fetch_preserves_order_and_gaps() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec()), (key(0xC0), b"\xCC".to_vec())]).await;

    let keys = [key(0xC0), key(0xE0), key(0xA0)];
    let blobs = backend.fetch_ledger_objects(&keys, 100).await.unwrap();
    assert_eq!(blobs, vec![Some(b"\xCC".to_vec()), None, Some(b"\xAA".to_vec())]);

    for (i, fetched) in blobs.iter().enumerate() {
        let single = backend.fetch_ledger_object(&keys[i], 100).await.unwrap();
        assert_eq!(*fetched, single);
    }
}

// ============================================================================
// Ledger pages
// ============================================================================

#[tokio::test]
async fn test_ledger_page_walk_with_cursor() {
    let backend = InMemoryBackend::default();
    let objects: Vec<(ObjectId, Vec<u8>)> =
        (1..=5u8).map(|i| (key(i * 0x10), vec![i])).collect();
    write_base_ledger(&backend, 100, &objects).await;

    let first = backend.fetch_ledger_page(None, 100, 2).await.unwrap();
    assert_eq!(
        first.objects.iter().map(|o| o.key).collect::<Vec<_>>(),
        vec![key(0x10), key(0x20)]
    );
    assert_eq!(first.cursor, Some(key(0x20)));

    let second = backend.fetch_ledger_page(first.cursor, 100, 2).await.unwrap();
    assert_eq!(
        second.objects.iter().map(|o| o.key).collect::<Vec<_>>(),
        vec![key(0x30), key(0x40)]
    );

    let last = backend.fetch_ledger_page(second.cursor, 100, 2).await.unwrap();
    assert_eq!(last.objects.iter().map(|o| o.key).collect::<Vec<_>>(), vec![key(0x50)]);
    assert_eq!(last.cursor, None);

    let empty = backend.fetch_ledger_page(None, 100, 0).await.unwrap();
    assert!(empty.objects.is_empty());
    assert_eq!(empty.cursor, None);
}

// ============================================================================
// Book offers
// ============================================================================

#[tokio::test]
async fn test_book_offers_walks_directory_pages_in_order() {
    let backend = InMemoryBackend::default();

    let mut book_bytes = [0u8; 32];
    book_bytes[0] = 0x40;
    let book = ObjectId::new(book_bytes);
    let mut dir_bytes = book_bytes;
    dir_bytes[31] = 0x01;
    let dir = ObjectId::new(dir_bytes);
    assert!(dir > book && dir < book_end(&book));

    // Offers 0..30 in directory order, ten per page.
    let offers: Vec<ObjectId> = (0..30u8).map(|i| key(0x80 + i)).collect();
    let page_keys = [dir, keylet_page(&dir, 1), keylet_page(&keylet_page(&dir, 1), 2)];
    let pages = [
        DirectoryPage { indexes: offers[0..10].to_vec(), next_page: Some(1) },
        DirectoryPage { indexes: offers[10..20].to_vec(), next_page: Some(2) },
        DirectoryPage { indexes: offers[20..30].to_vec(), next_page: None },
    ];

    backend.start_writes().await.unwrap();
    for (page_key, page) in page_keys.iter().zip(&pages) {
        backend
            .write_ledger_object(*page_key, 100, page.to_blob().unwrap())
            .await
            .unwrap();
    }
    for (i, offer) in offers.iter().enumerate() {
        backend.write_ledger_object(*offer, 100, vec![i as u8 + 1]).await.unwrap();
    }
    backend.write_successor(book, 100, Some(dir)).await.unwrap();
    backend.write_ledger(&header(100)).await.unwrap();
    assert!(backend.finish_writes(100).await.unwrap());

    let result = backend.fetch_book_offers(&book, 100, 25, None).await.unwrap();
    assert_eq!(result.len(), 25);
    for (i, offer) in result.iter().enumerate() {
        assert_eq!(offer.key, offers[i]);
        assert_eq!(offer.blob, vec![i as u8 + 1]);
    }

    let none = backend.fetch_book_offers(&book, 100, 0, None).await.unwrap();
    assert!(none.is_empty());

    let all = backend.fetch_book_offers(&book, 100, 100, None).await.unwrap();
    assert_eq!(all.len(), 30);
}

// ============================================================================
// Fees
// ============================================================================

#[tokio::test]
async fn test_fees_decode_and_absence() {
    let backend = InMemoryBackend::default();
    let fees = FeeSettings { base: Some(10), units: Some(10), reserve: None, increment: None };
    write_base_ledger(&backend, 100, &[]).await;
    assert_eq!(backend.fetch_fees(100).await.unwrap(), None);

    let diff = vec![LedgerObject::new(fees_key(), fees.to_blob().unwrap())];
    assert!(apply_ledger(&backend, 101, &diff).await);
    assert_eq!(backend.fetch_fees(101).await.unwrap(), Some(fees));
}

// ============================================================================
// Diffs
// ============================================================================

#[tokio::test]
async fn test_ledger_diff_roundtrip() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"\xAA".to_vec()), (key(0xB0), b"\xBB".to_vec())]).await;

    let diff = vec![
        LedgerObject::new(key(0xA0), Vec::new()),
        LedgerObject::new(key(0xC0), b"\xCC".to_vec()),
    ];
    assert!(apply_ledger(&backend, 101, &diff).await);

    let mut stored = backend.fetch_ledger_diff(101).await.unwrap();
    stored.sort_by_key(|object| object.key);
    assert_eq!(stored, diff);
}

// ============================================================================
// Transactions and ledger headers
// ============================================================================

#[tokio::test]
async fn test_transaction_roundtrip_and_ledger_listing() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[]).await;

    let record = TransactionRecord {
        hash: hash(0x77),
        transaction: b"tx-body".to_vec(),
        metadata: b"tx-meta".to_vec(),
        ledger_sequence: 100,
        date: 700_000_100,
    };
    backend.write_transaction(record.clone()).await.unwrap();

    assert_eq!(backend.fetch_transaction(&hash(0x77)).await.unwrap(), Some(record.clone()));
    assert_eq!(backend.fetch_transaction(&hash(0x78)).await.unwrap(), None);
    assert_eq!(
        backend.fetch_all_transaction_hashes_in_ledger(100).await.unwrap(),
        vec![hash(0x77)]
    );
    assert_eq!(backend.fetch_all_transactions_in_ledger(100).await.unwrap(), vec![record]);
}

#[tokio::test]
async fn test_ledger_header_fetch_by_sequence_and_hash() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[]).await;

    let expected = header(100);
    assert_eq!(backend.fetch_ledger_by_sequence(100).await.unwrap(), Some(expected.clone()));
    assert_eq!(backend.fetch_ledger_by_hash(&expected.hash).await.unwrap(), Some(expected));
    assert_eq!(backend.fetch_ledger_by_sequence(99).await.unwrap(), None);
    assert_eq!(backend.fetch_ledger_by_hash(&hash(0x00)).await.unwrap(), None);
}

// ============================================================================
// Account transaction history
// ============================================================================

#[tokio::test]
async fn test_account_transactions_page_both_directions() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[]).await;

    let alice = account(0x01);
    let bob = account(0x02);
    let mut data = Vec::new();
    for i in 0..5u32 {
        let record = TransactionRecord {
            hash: hash(0x30 + i as u8),
            transaction: vec![i as u8],
            metadata: Vec::new(),
            ledger_sequence: 100,
            date: 700_000_100,
        };
        backend.write_transaction(record).await.unwrap();
        data.push(AccountTransactionsData {
            ledger_sequence: 100,
            transaction_index: i,
            transaction_hash: hash(0x30 + i as u8),
            accounts: if i == 0 { vec![alice, bob] } else { vec![alice] },
        });
    }
    backend.write_account_transactions(data).await.unwrap();

    // Backward: newest first, two pages.
    let first = backend.fetch_account_transactions(&alice, 3, false, None).await.unwrap();
    assert_eq!(
        first.transactions.iter().map(|t| t.hash).collect::<Vec<_>>(),
        vec![hash(0x34), hash(0x33), hash(0x32)]
    );
    let cursor = first.cursor.expect("more history");
    assert_eq!(cursor, AccountTxCursor::new(100, 2));

    let second =
        backend.fetch_account_transactions(&alice, 3, false, Some(cursor)).await.unwrap();
    assert_eq!(
        second.transactions.iter().map(|t| t.hash).collect::<Vec<_>>(),
        vec![hash(0x31), hash(0x30)]
    );
    assert_eq!(second.cursor, None);

    // Forward from the beginning.
    let forward = backend.fetch_account_transactions(&alice, 2, true, None).await.unwrap();
    assert_eq!(
        forward.transactions.iter().map(|t| t.hash).collect::<Vec<_>>(),
        vec![hash(0x30), hash(0x31)]
    );
    assert_eq!(forward.cursor, Some(AccountTxCursor::new(100, 1)));

    // Bob only appears on the first transaction.
    let bobs = backend.fetch_account_transactions(&bob, 10, false, None).await.unwrap();
    assert_eq!(bobs.transactions.len(), 1);
    assert_eq!(bobs.cursor, None);

    // Limit zero is an empty page.
    let empty = backend.fetch_account_transactions(&alice, 0, false, None).await.unwrap();
    assert!(empty.transactions.is_empty());
}

// ============================================================================
// Online delete
// ============================================================================

#[tokio::test]
async fn test_online_delete_advances_minimum_and_keeps_cutoff_state() {
    let backend = InMemoryBackend::default();
    write_base_ledger(&backend, 100, &[(key(0xA0), b"v100".to_vec()), (key(0xB0), b"\xBB".to_vec())]).await;
    for sequence in 101..=105 {
        let diff = if sequence == 102 {
            vec![LedgerObject::new(key(0xA0), b"v102".to_vec())]
        } else {
            Vec::new()
        };
        assert!(apply_ledger(&backend, sequence, &diff).await);
    }

    backend.online_delete(2).await.unwrap();

    assert_eq!(
        backend.hard_fetch_ledger_range().await.unwrap(),
        Some(LedgerRange::new(103, 105))
    );
    assert_eq!(backend.ledger_range(), Some(LedgerRange::new(103, 105)));
    // State at and after the cutoff is intact, bypassing the cache.
    assert_eq!(
        backend.fetch_ledger_object_uncached(&key(0xA0), 103).await.unwrap(),
        Some(b"v102".to_vec())
    );
    assert_eq!(
        backend.fetch_ledger_object_uncached(&key(0xB0), 105).await.unwrap(),
        Some(b"\xBB".to_vec())
    );
    // History below the cutoff is gone.
    assert_eq!(backend.fetch_ledger_object_uncached(&key(0xA0), 101).await.unwrap(), None);
    assert!(backend.fetch_ledger_diff(101).await.unwrap().is_empty());
}
