//! redb table definitions and key layout
//!
//! Defines all tables used by the redb log store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use redb::TableDefinition;

use crate::entry::TransactionId;

// Table definitions
// Key: (tx_len, tx_id, sequence) concatenated, Value: serialized LogEntry
pub const LOG_ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("log_entries");

// Key: transaction id, Value: number of live entries
pub const LOG_KEYS: TableDefinition<&str, u64> = TableDefinition::new("log_keys");

// Key: counter name, Value: counter
pub const LOG_META: TableDefinition<&str, u64> = TableDefinition::new("log_meta");

/// Counter in [`LOG_META`] holding the next sequence number
pub const NEXT_SEQUENCE: &str = "next_sequence";

/// Configuration for redb storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedbLogConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbLogConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/sagalog.redb"),
            cache_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl RedbLogConfig {
    /// Config for a database file at the given path
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

/// Key prefix shared by every entry of one transaction
///
/// The ID is length-prefixed so that no transaction's prefix is a prefix
/// of another's ("tx1" never matches "tx10").
pub fn entry_prefix(transaction_id: &TransactionId) -> Vec<u8> {
    let id = transaction_id.as_bytes();
    let mut key = Vec::with_capacity(4 + id.len() + 8);
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// Key of one entry; big-endian sequence keeps entries in append order
pub fn entry_key(transaction_id: &TransactionId, sequence: u64) -> Vec<u8> {
    let mut key = entry_prefix(transaction_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Inclusive key bounds covering every entry of a transaction
pub fn entry_bounds(transaction_id: &TransactionId) -> (Vec<u8>, Vec<u8>) {
    (
        entry_key(transaction_id, 0),
        entry_key(transaction_id, u64::MAX),
    )
}
