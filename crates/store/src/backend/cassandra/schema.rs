//! Schema definition and query text for the Cassandra store.
//!
//! All tables live in one keyspace and are created on first open. Queries
//! are kept here as a single set so the table layouts and the statements
//! that touch them cannot drift apart.
//!
//! Table layouts:
//!
//! - `objects(key, sequence DESC, object)` — object state per sequence;
//!   point lookup is "newest row at or below S"
//! - `successor(key, seq DESC, next)` — successor links per sequence;
//!   empty `next` is a tombstone
//! - `diff(seq, key)` — keys mutated per ledger
//! - `transactions(hash, ledger_seq, date, transaction, metadata)`
//! - `ledger_transactions(ledger_seq, hash)`
//! - `account_tx(account, seq_idx DESC, hash)`
//! - `ledgers(sequence, header)`
//! - `ledger_hashes(hash, sequence)`
//! - `ledger_range(is_latest, sequence)` — two rows: `false` holds the
//!   minimum, `true` the maximum of the visible window

use chronicle_types::CassandraConfig;

/// Every query the store prepares, in one place.
#[derive(Debug)]
pub(crate) struct Queries {
    pub insert_object: String,
    pub insert_successor: String,
    pub insert_diff: String,
    pub insert_transaction: String,
    pub insert_ledger_transaction: String,
    pub insert_account_tx: String,
    pub insert_ledger_header: String,
    pub insert_ledger_hash: String,
    pub update_ledger_range: String,
    pub update_ledger_range_min: String,
    pub select_object: String,
    pub select_successor: String,
    pub select_diff: String,
    pub select_transaction: String,
    pub select_ledger_transactions: String,
    pub select_account_tx: String,
    pub select_account_tx_forward: String,
    pub select_ledger_by_sequence: String,
    pub select_ledger_by_hash: String,
    pub select_latest_ledger: String,
    pub select_ledger_range: String,
    pub delete_object_history: String,
    pub delete_successor_history: String,
    pub delete_diff: String,
}

/// Fully qualified table name with the configured prefix.
fn table(config: &CassandraConfig, name: &str) -> String {
    format!("{}.{}", config.keyspace, config.table_name(name))
}

/// DDL creating the keyspace, if missing.
pub(crate) fn create_keyspace(config: &CassandraConfig) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': '{}'}} \
         AND durable_writes = true",
        config.keyspace, config.replication_factor
    )
}

/// DDL creating every table, if missing.
pub(crate) fn create_tables(config: &CassandraConfig) -> Vec<String> {
    let ttl = config
        .ttl_secs
        .map(|secs| format!(" AND default_time_to_live = {secs}"))
        .unwrap_or_default();

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (key blob, sequence bigint, object blob, \
             PRIMARY KEY (key, sequence)) WITH CLUSTERING ORDER BY (sequence DESC){ttl}",
            table(config, "objects")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (key blob, seq bigint, next blob, \
             PRIMARY KEY (key, seq)) WITH CLUSTERING ORDER BY (seq DESC){ttl}",
            table(config, "successor")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (seq bigint, key blob, PRIMARY KEY (seq, key))",
            table(config, "diff")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (hash blob PRIMARY KEY, ledger_seq bigint, \
             date bigint, transaction blob, metadata blob)",
            table(config, "transactions")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (ledger_seq bigint, hash blob, \
             PRIMARY KEY (ledger_seq, hash))",
            table(config, "ledger_transactions")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (account blob, seq_idx tuple<bigint, bigint>, \
             hash blob, PRIMARY KEY (account, seq_idx)) \
             WITH CLUSTERING ORDER BY (seq_idx DESC)",
            table(config, "account_tx")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (sequence bigint PRIMARY KEY, header blob)",
            table(config, "ledgers")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (hash blob PRIMARY KEY, sequence bigint)",
            table(config, "ledger_hashes")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (is_latest boolean PRIMARY KEY, sequence bigint)",
            table(config, "ledger_range")
        ),
    ]
}

impl Queries {
    /// Builds the query set for the configured keyspace and prefix.
    pub(crate) fn new(config: &CassandraConfig) -> Self {
        let objects = table(config, "objects");
        let successor = table(config, "successor");
        let diff = table(config, "diff");
        let transactions = table(config, "transactions");
        let ledger_transactions = table(config, "ledger_transactions");
        let account_tx = table(config, "account_tx");
        let ledgers = table(config, "ledgers");
        let ledger_hashes = table(config, "ledger_hashes");
        let ledger_range = table(config, "ledger_range");

        Self {
            insert_object: format!(
                "INSERT INTO {objects} (key, sequence, object) VALUES (?, ?, ?)"
            ),
            insert_successor: format!(
                "INSERT INTO {successor} (key, seq, next) VALUES (?, ?, ?)"
            ),
            insert_diff: format!("INSERT INTO {diff} (seq, key) VALUES (?, ?)"),
            insert_transaction: format!(
                "INSERT INTO {transactions} (hash, ledger_seq, date, transaction, metadata) \
                 VALUES (?, ?, ?, ?, ?)"
            ),
            insert_ledger_transaction: format!(
                "INSERT INTO {ledger_transactions} (ledger_seq, hash) VALUES (?, ?)"
            ),
            insert_account_tx: format!(
                "INSERT INTO {account_tx} (account, seq_idx, hash) VALUES (?, ?, ?)"
            ),
            insert_ledger_header: format!(
                "INSERT INTO {ledgers} (sequence, header) VALUES (?, ?)"
            ),
            insert_ledger_hash: format!(
                "INSERT INTO {ledger_hashes} (hash, sequence) VALUES (?, ?)"
            ),
            // IN (?, NULL) lets the first-ever commit apply against the
            // absent row while still fencing against concurrent writers.
            update_ledger_range: format!(
                "UPDATE {ledger_range} SET sequence = ? WHERE is_latest = ? \
                 IF sequence IN (?, NULL)"
            ),
            update_ledger_range_min: format!(
                "UPDATE {ledger_range} SET sequence = ? WHERE is_latest = false"
            ),
            select_object: format!(
                "SELECT object FROM {objects} WHERE key = ? AND sequence <= ? LIMIT 1"
            ),
            select_successor: format!(
                "SELECT next FROM {successor} WHERE key = ? AND seq <= ? LIMIT 1"
            ),
            select_diff: format!("SELECT key FROM {diff} WHERE seq = ?"),
            select_transaction: format!(
                "SELECT transaction, metadata, ledger_seq, date FROM {transactions} \
                 WHERE hash = ?"
            ),
            select_ledger_transactions: format!(
                "SELECT hash FROM {ledger_transactions} WHERE ledger_seq = ?"
            ),
            select_account_tx: format!(
                "SELECT hash, seq_idx FROM {account_tx} WHERE account = ? \
                 AND seq_idx < ? LIMIT ?"
            ),
            select_account_tx_forward: format!(
                "SELECT hash, seq_idx FROM {account_tx} WHERE account = ? \
                 AND seq_idx > ? ORDER BY seq_idx ASC LIMIT ?"
            ),
            select_ledger_by_sequence: format!(
                "SELECT header FROM {ledgers} WHERE sequence = ?"
            ),
            select_ledger_by_hash: format!(
                "SELECT sequence FROM {ledger_hashes} WHERE hash = ?"
            ),
            select_latest_ledger: format!(
                "SELECT sequence FROM {ledger_range} WHERE is_latest = true"
            ),
            select_ledger_range: format!(
                "SELECT is_latest, sequence FROM {ledger_range}"
            ),
            delete_object_history: format!(
                "DELETE FROM {objects} WHERE key = ? AND sequence < ?"
            ),
            delete_successor_history: format!(
                "DELETE FROM {successor} WHERE key = ? AND seq < ?"
            ),
            delete_diff: format!("DELETE FROM {diff} WHERE seq = ?"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(prefix: Option<&str>, ttl: Option<u32>) -> CassandraConfig {
        let mut config = CassandraConfig::builder()
            .contact_points(vec!["localhost".to_string()])
            .keyspace("chronicle")
            .build()
            .expect("valid config");
        config.table_prefix = prefix.map(str::to_string);
        config.ttl_secs = ttl;
        config
    }

    #[test]
    fn test_tables_are_keyspace_qualified() {
        let queries = Queries::new(&config(None, None));
        assert!(queries.select_object.contains("chronicle.objects"));
        assert!(queries.insert_ledger_header.contains("chronicle.ledgers"));
    }

    #[test]
    fn test_prefix_applies_to_every_table() {
        let queries = Queries::new(&config(Some("rpt_"), None));
        assert!(queries.select_object.contains("chronicle.rpt_objects"));
        assert!(queries.update_ledger_range.contains("chronicle.rpt_ledger_range"));
        for ddl in create_tables(&config(Some("rpt_"), None)) {
            assert!(ddl.contains("chronicle.rpt_"), "unprefixed DDL: {ddl}");
        }
    }

    #[test]
    fn test_ttl_only_on_object_and_successor_tables() {
        let ddl = create_tables(&config(None, Some(86_400)));
        let with_ttl: Vec<_> =
            ddl.iter().filter(|s| s.contains("default_time_to_live = 86400")).collect();
        assert_eq!(with_ttl.len(), 2);
        assert!(with_ttl[0].contains("objects"));
        assert!(with_ttl[1].contains("successor"));
    }

    #[test]
    fn test_keyspace_ddl_uses_replication_factor() {
        let mut config = config(None, None);
        config.replication_factor = 5;
        assert!(create_keyspace(&config).contains("'replication_factor': '5'"));
    }
}
