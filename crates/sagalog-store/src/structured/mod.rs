//! Structured storage using redb
//!
//! Entries live in an ordered key-value table keyed by transaction and
//! sequence, so a transaction's log is one contiguous key range. A second
//! table tracks which transactions currently have entries.

mod redb_log;
mod tables;

pub use redb_log::RedbLogStore;
pub use tables::{LOG_ENTRIES, LOG_KEYS, LOG_META, RedbLogConfig};
