//! Error types for sagalog-store
//!
//! Every failure the durable medium reports is surfaced as a
//! [`StorageError`]. Only [`StorageError::NotFound`] is a "no such record"
//! outcome; every other variant means the medium could not complete the
//! request.

use thiserror::Error;

/// Errors that can occur in log store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error against the underlying file or directory
    #[error("I/O error: {0}")]
    Io(String),

    /// The embedded database rejected or failed the operation
    #[error("Database error: {0}")]
    Database(String),

    /// No log entry exists for the requested transaction
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Persisted data failed an integrity check
    #[error("Corrupted log: {0}")]
    Corrupted(String),

    /// Transaction IDs must be non-empty
    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    /// Another store already holds the medium open
    #[error("Log is locked by another store: {0}")]
    Locked(String),

    /// The store has been closed and its medium handle released
    #[error("Log store is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a new Corrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// True for the "no entry for this transaction" outcome of `last_log`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the medium could not complete the operation
    pub fn is_storage_failure(&self) -> bool {
        !self.is_not_found()
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

macro_rules! impl_from_redb {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StorageError {
                fn from(err: $ty) -> Self {
                    StorageError::Database(err.to_string())
                }
            }
        )*
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError,
);
