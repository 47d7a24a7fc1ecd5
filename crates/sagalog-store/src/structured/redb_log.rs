//! redb-backed log store
//!
//! Each append and each cleanup is a single redb write transaction, so
//! redb's commit is both the durability point and the atomicity boundary.
//! Readers run in MVCC read transactions and never see a half-applied
//! cleanup.

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableTable};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, trace};

use super::tables::{
    LOG_ENTRIES, LOG_KEYS, LOG_META, NEXT_SEQUENCE, RedbLogConfig, entry_bounds, entry_key,
};
use crate::LogStore;
use crate::entry::{LogEntry, TransactionId};
use crate::error::StorageError;

/// Log store persisted in a redb database file
pub struct RedbLogStore {
    db: RwLock<Option<Database>>,
    config: RedbLogConfig,
}

impl RedbLogStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbLogConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)?;

        // Dropping `db` on error releases the file
        Self::init_tables(&db)?;

        info!("Opened redb log store");

        Ok(Self {
            db: RwLock::new(Some(db)),
            config,
        })
    }

    /// Create tables if they don't exist
    fn init_tables(db: &Database) -> Result<(), StorageError> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(LOG_ENTRIES)?;
        write_txn.open_table(LOG_KEYS)?;
        write_txn.open_table(LOG_META)?;
        write_txn.commit()?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbLogConfig {
        &self.config
    }

    /// Run a closure against the open database
    async fn with_db<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Database) -> Result<T, StorageError> + Send,
    {
        let guard = self.db.read().await;
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        f(db)
    }

    fn decode(value: &[u8]) -> Result<LogEntry, StorageError> {
        postcard::from_bytes(value).map_err(|e| StorageError::deserialization(e.to_string()))
    }

    fn last_entry<T>(
        table: &T,
        transaction_id: &TransactionId,
    ) -> Result<Option<LogEntry>, StorageError>
    where
        T: ReadableTable<&'static [u8], &'static [u8]>,
    {
        let (lo, hi) = entry_bounds(transaction_id);
        let mut range = table.range(lo.as_slice()..=hi.as_slice())?;
        match range.next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::decode(value.value())?))
            }
            None => Ok(None),
        }
    }

    fn append_in(
        db: &Database,
        transaction_id: &TransactionId,
        payload: Bytes,
    ) -> Result<u64, StorageError> {
        let write_txn = db.begin_write()?;

        let sequence = {
            let mut meta = write_txn.open_table(LOG_META)?;
            let sequence = meta.get(NEXT_SEQUENCE)?.map(|v| v.value()).unwrap_or(0);
            meta.insert(NEXT_SEQUENCE, sequence + 1)?;
            sequence
        };

        {
            let mut entries = write_txn.open_table(LOG_ENTRIES)?;
            let previous = Self::last_entry(&entries, transaction_id)?.map(|e| e.created_at_millis);
            let entry = LogEntry::new(transaction_id.clone(), sequence, payload, previous);
            let value = postcard::to_allocvec(&entry)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            let key = entry_key(transaction_id, sequence);
            entries.insert(key.as_slice(), value.as_slice())?;

            let mut keys = write_txn.open_table(LOG_KEYS)?;
            let count = keys
                .get(transaction_id.as_str())?
                .map(|v| v.value())
                .unwrap_or(0);
            keys.insert(transaction_id.as_str(), count + 1)?;
        }

        write_txn.commit()?;
        Ok(sequence)
    }

    fn entries_in(
        db: &Database,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LogEntry>, StorageError> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_ENTRIES)?;

        let (lo, hi) = entry_bounds(transaction_id);
        let mut entries = Vec::new();
        for item in table.range(lo.as_slice()..=hi.as_slice())? {
            let (_, value) = item?;
            entries.push(Self::decode(value.value())?);
        }
        Ok(entries)
    }

    fn last_log_in(db: &Database, transaction_id: &TransactionId) -> Result<Bytes, StorageError> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_ENTRIES)?;

        Self::last_entry(&table, transaction_id)?
            .map(|e| e.payload)
            .ok_or_else(|| StorageError::not_found(transaction_id.as_str()))
    }

    fn list_keys_in(db: &Database) -> Result<Vec<TransactionId>, StorageError> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(LOG_KEYS)?;

        let mut keys = Vec::new();
        for item in table.iter()? {
            let (key, count) = item?;
            if count.value() > 0 {
                keys.push(TransactionId::new(key.value())?);
            }
        }
        Ok(keys)
    }

    fn cleanup_in(db: &Database, transaction_id: &TransactionId) -> Result<usize, StorageError> {
        let write_txn = db.begin_write()?;

        let removed = {
            let mut entries = write_txn.open_table(LOG_ENTRIES)?;
            let (lo, hi) = entry_bounds(transaction_id);

            let mut doomed = Vec::new();
            for item in entries.range(lo.as_slice()..=hi.as_slice())? {
                let (key, _) = item?;
                doomed.push(key.value().to_vec());
            }
            for key in &doomed {
                entries.remove(key.as_slice())?;
            }

            let mut keys = write_txn.open_table(LOG_KEYS)?;
            keys.remove(transaction_id.as_str())?;
            doomed.len()
        };

        write_txn.commit()?;
        Ok(removed)
    }

    /// Compact the database file
    ///
    /// Takes the store exclusively for the duration, so no transaction
    /// can be open. Returns whether any space was reclaimed.
    #[instrument(skip(self))]
    pub async fn compact(&self) -> Result<bool, StorageError> {
        let mut guard = self.db.write().await;
        let db = guard.as_mut().ok_or(StorageError::Closed)?;
        let compacted = db.compact()?;
        info!(compacted, "Database compaction finished");
        Ok(compacted)
    }
}

#[async_trait]
impl LogStore for RedbLogStore {
    #[instrument(skip(self, payload), fields(tx = %transaction_id, len = payload.len()))]
    async fn append(
        &self,
        transaction_id: &TransactionId,
        payload: Bytes,
    ) -> Result<u64, StorageError> {
        let sequence = self
            .with_db(|db| Self::append_in(db, transaction_id, payload))
            .await?;
        trace!(sequence, "Appended entry");
        Ok(sequence)
    }

    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Vec<Bytes>, StorageError> {
        let entries = self
            .with_db(|db| Self::entries_in(db, transaction_id))
            .await?;
        Ok(entries.into_iter().map(|e| e.payload).collect())
    }

    async fn last_log(&self, transaction_id: &TransactionId) -> Result<Bytes, StorageError> {
        self.with_db(|db| Self::last_log_in(db, transaction_id))
            .await
    }

    async fn list_keys(&self) -> Result<Vec<TransactionId>, StorageError> {
        self.with_db(Self::list_keys_in).await
    }

    #[instrument(skip(self), fields(tx = %transaction_id))]
    async fn cleanup(&self, transaction_id: &TransactionId) -> Result<(), StorageError> {
        let removed = self
            .with_db(|db| Self::cleanup_in(db, transaction_id))
            .await?;
        debug!(removed, "Cleaned up transaction");
        Ok(())
    }

    async fn entries(&self, transaction_id: &TransactionId) -> Result<Vec<LogEntry>, StorageError> {
        self.with_db(|db| Self::entries_in(db, transaction_id))
            .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.db.write().await;
        if guard.take().is_some() {
            debug!(path = %self.config.db_path.display(), "Closed redb log store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id).unwrap()
    }

    fn create_test_store() -> (RedbLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbLogConfig::at(temp_dir.path().join("test.redb"));
        let store = RedbLogStore::open(config).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_append_lookup_last() {
        let (store, _temp) = create_test_store();

        for step in ["start", "step1", "commit"] {
            store.append(&tx("tx1"), Bytes::from(step)).await.unwrap();
        }

        assert_eq!(
            store.lookup(&tx("tx1")).await.unwrap(),
            vec!["start", "step1", "commit"]
        );
        assert_eq!(store.last_log(&tx("tx1")).await.unwrap(), "commit");
    }

    #[tokio::test]
    async fn test_prefix_ids_stay_separate() {
        let (store, _temp) = create_test_store();

        store.append(&tx("tx1"), Bytes::from("one")).await.unwrap();
        store.append(&tx("tx10"), Bytes::from("ten")).await.unwrap();

        assert_eq!(store.lookup(&tx("tx1")).await.unwrap(), vec!["one"]);
        assert_eq!(store.last_log(&tx("tx1")).await.unwrap(), "one");

        store.cleanup(&tx("tx1")).await.unwrap();
        assert_eq!(store.lookup(&tx("tx10")).await.unwrap(), vec!["ten"]);
    }

    #[tokio::test]
    async fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.redb");

        {
            let store = RedbLogStore::open(RedbLogConfig::at(&path)).unwrap();
            for i in 0..3 {
                store
                    .append(&tx("a"), Bytes::from(format!("a{i}")))
                    .await
                    .unwrap();
            }
            store.cleanup(&tx("a")).await.unwrap();
            store.close().await.unwrap();
        }

        let store = RedbLogStore::open(RedbLogConfig::at(&path)).unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
        assert_eq!(store.append(&tx("b"), Bytes::from("b0")).await.unwrap(), 3);

        let entries = store.entries(&tx("b")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_compact_and_close() {
        let (store, _temp) = create_test_store();

        for i in 0..100 {
            store
                .append(&tx("bulk"), Bytes::from(vec![i as u8; 512]))
                .await
                .unwrap();
        }
        store.cleanup(&tx("bulk")).await.unwrap();
        store.compact().await.unwrap();

        assert!(store.list_keys().await.unwrap().is_empty());

        store.close().await.unwrap();
        assert!(matches!(
            store.lookup(&tx("bulk")).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.compact().await, Err(StorageError::Closed)));
    }
}
