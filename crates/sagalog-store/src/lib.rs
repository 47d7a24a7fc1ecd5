//! # Sagalog Store
//!
//! Durable, ordered, per-transaction log storage for saga coordinators.
//!
//! A saga coordinator records every step of a long-running distributed
//! transaction through a [`LogStore`] so that, after a crash, it can read
//! back how far each transaction got. The store never interprets payloads.
//!
//! ## Features
//!
//! - **LogStore trait**: append, lookup, latest entry, key enumeration,
//!   cleanup and close over any durable medium
//! - **InMemoryLogStore**: non-durable implementation for tests and simulation
//! - **FileLogStore**: append-only, checksummed log file with replay on open
//! - **RedbLogStore**: embedded transactional key-value store backend
//! - **StoreConfig**: selects and opens a backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use bytes::Bytes;
//! use sagalog_store::{InMemoryLogStore, LogStore, TransactionId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryLogStore::new();
//!     let tx = TransactionId::new("tx1").unwrap();
//!
//!     store.append(&tx, Bytes::from("start")).await.unwrap();
//!     store.append(&tx, Bytes::from("commit")).await.unwrap();
//!
//!     assert_eq!(store.last_log(&tx).await.unwrap(), Bytes::from("commit"));
//!
//!     store.cleanup(&tx).await.unwrap();
//!     assert!(store.lookup(&tx).await.unwrap().is_empty());
//! }
//! ```

pub mod append_log;
pub mod config;
pub mod entry;
pub mod error;
pub mod memory;
pub mod structured;

// Re-exports
pub use append_log::{FileLogConfig, FileLogStore};
pub use config::{StoreConfig, open_store};
pub use entry::{LogEntry, TransactionId};
pub use error::StorageError;
pub use memory::InMemoryLogStore;
pub use structured::{RedbLogConfig, RedbLogStore};

use async_trait::async_trait;
use bytes::Bytes;

/// Durable log of opaque payloads, partitioned by transaction ID
///
/// Implementations guarantee, regardless of medium:
///
/// - An append does not return `Ok` until the entry is durable, and the
///   entry is visible to every lookup issued afterwards
/// - Concurrent appends are linearized; every reader sees one order
/// - A cleanup is never observed as a partial deletion
/// - Reads reflect the medium's current state (no stale cache)
///
/// Implementations never retry internally; every medium error is
/// returned to the caller.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Durably append a payload to a transaction's log
    ///
    /// Returns the store-assigned sequence number of the new entry.
    ///
    /// # Errors
    ///
    /// Any medium failure. The entry is then either fully persisted or
    /// not persisted at all.
    async fn append(&self, transaction_id: &TransactionId, payload: Bytes)
    -> Result<u64, StorageError>;

    /// All payloads for a transaction, oldest first
    ///
    /// An unknown transaction yields an empty vector.
    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Vec<Bytes>, StorageError>;

    /// Payload of the most recently appended entry
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] when the transaction has no entries.
    async fn last_log(&self, transaction_id: &TransactionId) -> Result<Bytes, StorageError>;

    /// Every distinct transaction ID with at least one live entry
    async fn list_keys(&self) -> Result<Vec<TransactionId>, StorageError>;

    /// Atomically delete every entry of a transaction
    ///
    /// Cleaning up a transaction with no entries succeeds.
    async fn cleanup(&self, transaction_id: &TransactionId) -> Result<(), StorageError>;

    /// Full entries (with sequence and timestamp) in append order
    async fn entries(&self, transaction_id: &TransactionId)
    -> Result<Vec<LogEntry>, StorageError>;

    /// Release the medium handle
    ///
    /// Later operations fail with [`StorageError::Closed`]. The handle is
    /// considered released even when an error is returned.
    async fn close(&self) -> Result<(), StorageError>;
}
