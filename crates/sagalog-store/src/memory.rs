//! In-memory log store
//!
//! Suitable for tests and simulation. Nothing survives the process; the
//! durability guarantees of [`LogStore`] hold only for the lifetime of
//! the store value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::LogStore;
use crate::entry::{LogEntry, TransactionId};
use crate::error::StorageError;

/// In-memory implementation of LogStore
///
/// Uses `DashMap` for concurrent access to per-transaction entry lists.
/// Appends to one transaction serialize on that transaction's shard lock,
/// which is also where the sequence number is drawn, so sequence order and
/// list order always agree.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    /// Map from transaction to its entries in append order
    logs: DashMap<TransactionId, Vec<LogEntry>>,
    /// Next sequence number to hand out
    next_sequence: AtomicU64,
    /// Set once `close` has been called
    closed: AtomicBool,
}

impl InMemoryLogStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all transactions
    pub fn total_entries(&self) -> usize {
        self.logs.iter().map(|log| log.value().len()).sum()
    }

    /// Number of transactions with at least one entry
    pub fn transaction_count(&self) -> usize {
        self.logs.len()
    }

    /// Check if the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(
        &self,
        transaction_id: &TransactionId,
        payload: Bytes,
    ) -> Result<u64, StorageError> {
        self.ensure_open()?;

        let mut log = self.logs.entry(transaction_id.clone()).or_default();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let previous = log.last().map(|e| e.created_at_millis);
        log.push(LogEntry::new(
            transaction_id.clone(),
            sequence,
            payload,
            previous,
        ));

        trace!(tx = %transaction_id, sequence, "Appended entry");
        Ok(sequence)
    }

    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Vec<Bytes>, StorageError> {
        self.ensure_open()?;

        match self.logs.get(transaction_id) {
            Some(log) => Ok(log.iter().map(|e| e.payload.clone()).collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn last_log(&self, transaction_id: &TransactionId) -> Result<Bytes, StorageError> {
        self.ensure_open()?;

        self.logs
            .get(transaction_id)
            .and_then(|log| log.last().map(|e| e.payload.clone()))
            .ok_or_else(|| StorageError::not_found(transaction_id.as_str()))
    }

    async fn list_keys(&self) -> Result<Vec<TransactionId>, StorageError> {
        self.ensure_open()?;

        let mut keys: Vec<TransactionId> = self
            .logs
            .iter()
            .filter(|log| !log.value().is_empty())
            .map(|log| log.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn cleanup(&self, transaction_id: &TransactionId) -> Result<(), StorageError> {
        self.ensure_open()?;

        if let Some((_, removed)) = self.logs.remove(transaction_id) {
            debug!(tx = %transaction_id, removed = removed.len(), "Cleaned up transaction");
        }
        Ok(())
    }

    async fn entries(&self, transaction_id: &TransactionId) -> Result<Vec<LogEntry>, StorageError> {
        self.ensure_open()?;

        Ok(self
            .logs
            .get(transaction_id)
            .map(|log| log.value().clone())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.logs.clear();
            debug!("Closed in-memory log store");
        }
        Ok(())
    }
}
