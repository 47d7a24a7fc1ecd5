//! Log entry types
//!
//! A [`LogEntry`] is the unit of durability: one opaque payload recorded
//! under a [`TransactionId`], stamped by the store with a sequence number
//! and an append timestamp.

use std::borrow::Borrow;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Identifier of one saga instance; partitions the log.
///
/// Many entries share one transaction ID. The only validation is that it
/// is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction ID, rejecting the empty string
    pub fn new(id: impl Into<String>) -> Result<Self, StorageError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StorageError::InvalidTransactionId(
                "transaction id must be non-empty".into(),
            ));
        }
        Ok(Self(id))
    }

    /// The ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ID as raw bytes (used for medium keys)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TransactionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TransactionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TransactionId {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

/// A single immutable entry in a transaction's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Transaction this entry belongs to
    pub transaction_id: TransactionId,
    /// Store-wide append sequence; strictly increasing, never reused
    pub sequence: u64,
    /// Timestamp assigned at append time (Unix millis)
    pub created_at_millis: i64,
    /// Opaque coordinator payload
    pub payload: Bytes,
}

impl LogEntry {
    /// Create a new entry stamped with the current time
    ///
    /// `not_before_millis` is the timestamp of the previous entry for the
    /// same transaction; the new stamp never goes below it, so timestamps
    /// stay non-decreasing even if the wall clock steps backwards.
    pub fn new(
        transaction_id: TransactionId,
        sequence: u64,
        payload: Bytes,
        not_before_millis: Option<i64>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            transaction_id,
            sequence,
            created_at_millis: not_before_millis.map_or(now, |prev| now.max(prev)),
            payload,
        }
    }

    /// Append timestamp as a `chrono` value
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.created_at_millis)
    }
}
