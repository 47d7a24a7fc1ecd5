//! Backend selection
//!
//! [`StoreConfig`] names a backend and its settings; [`open_store`] turns it
//! into a ready [`LogStore`]. Reading the config from a file or the
//! environment is left to the embedding application.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::LogStore;
use crate::append_log::{FileLogConfig, FileLogStore};
use crate::error::StorageError;
use crate::memory::InMemoryLogStore;
use crate::structured::{RedbLogConfig, RedbLogStore};

/// Which durable medium backs the log store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process memory; nothing survives a restart
    Memory,
    /// Single append-only log file
    File(FileLogConfig),
    /// Embedded redb database
    Redb(RedbLogConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Redb(RedbLogConfig::default())
    }
}

impl StoreConfig {
    /// Short backend name, for logs
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
            Self::Redb(_) => "redb",
        }
    }
}

/// Open the configured backend
///
/// The returned handle owns the medium; pass it (or an `Arc` of it) to
/// every component that logs saga steps.
pub async fn open_store(config: StoreConfig) -> Result<Box<dyn LogStore>, StorageError> {
    let backend = config.backend_name();
    let store: Box<dyn LogStore> = match config {
        StoreConfig::Memory => Box::new(InMemoryLogStore::new()),
        StoreConfig::File(config) => Box::new(FileLogStore::open(config).await?),
        StoreConfig::Redb(config) => Box::new(RedbLogStore::open(config)?),
    };
    info!(backend, "Log store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionId;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_deserialize_tagged_config() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"backend":"file","path":"/tmp/saga.log"}"#).unwrap();
        match config {
            StoreConfig::File(file) => {
                assert_eq!(file.path, std::path::PathBuf::from("/tmp/saga.log"));
                assert!(file.sync_on_write);
            }
            other => panic!("unexpected backend {}", other.backend_name()),
        }

        let config: StoreConfig = serde_json::from_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(config.backend_name(), "memory");
    }

    #[test]
    fn test_default_is_redb() {
        assert_eq!(StoreConfig::default().backend_name(), "redb");
    }

    #[tokio::test]
    async fn test_open_each_backend() {
        let temp_dir = TempDir::new().unwrap();
        let configs = vec![
            StoreConfig::Memory,
            StoreConfig::File(FileLogConfig::at(temp_dir.path().join("saga.log"))),
            StoreConfig::Redb(RedbLogConfig::at(temp_dir.path().join("saga.redb"))),
        ];

        for config in configs {
            let name = config.backend_name();
            let store = open_store(config).await.unwrap();
            let tx = TransactionId::new(format!("{name}-tx")).unwrap();
            store.append(&tx, Bytes::from(name)).await.unwrap();
            assert_eq!(store.last_log(&tx).await.unwrap(), name);
            store.close().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_open_failure_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the log file should be
        let path = temp_dir.path().join("occupied");
        std::fs::create_dir_all(&path).unwrap();

        let result = open_store(StoreConfig::File(FileLogConfig::at(&path))).await;
        assert!(result.err().unwrap().is_storage_failure());
    }
}
