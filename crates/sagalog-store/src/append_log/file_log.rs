//! File-backed log store
//!
//! All transactions share one append-only log file. An in-memory index
//! maps each transaction to the file offsets of its live entries; entry
//! contents are always read back from the file.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, trace, warn};

use super::frame::{self, FRAME_HEADER_LEN, LogRecord};
use crate::LogStore;
use crate::entry::{LogEntry, TransactionId};
use crate::error::StorageError;

/// Configuration for a file-backed log store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Path of the log file
    pub path: PathBuf,
    /// Whether to fsync after every write
    pub sync_on_write: bool,
    /// Largest encoded record accepted by `append` (bytes)
    pub max_record_size: usize,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/sagalog.log"),
            sync_on_write: true,
            max_record_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl FileLogConfig {
    /// Config for a log file at the given path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path of the lock file guarding the log
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }
}

/// Result of a compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Live entries carried into the new file
    pub entries_retained: usize,
    /// Bytes freed on disk
    pub bytes_reclaimed: u64,
}

/// Live entries of one transaction
#[derive(Debug, Default)]
struct TxIndex {
    /// Frame offsets in append order
    offsets: Vec<u64>,
    /// Timestamp of the newest entry
    last_created_at_millis: i64,
}

/// Open file plus everything derived from it
struct LogState {
    /// Append handle
    file: File,
    /// Current end of the valid log
    len: u64,
    /// Next sequence number to hand out
    next_sequence: u64,
    /// Transaction -> live entry locations
    index: BTreeMap<TransactionId, TxIndex>,
    /// Holds the exclusive lock until the state is dropped
    _lock: std::fs::File,
}

/// Outcome of scanning the log file on open
struct Replay {
    index: BTreeMap<TransactionId, TxIndex>,
    next_sequence: u64,
    valid_len: u64,
    records: usize,
}

/// Log store persisted as a single append-only file
///
/// Writers (append, cleanup, compact) take the state lock exclusively,
/// so the file order, the sequence order and the index always agree.
/// Readers share the lock and read entries through their own handle.
///
/// A write whose rollback also fails leaves the file in an unknown state;
/// the store then closes itself and every later call fails with
/// [`StorageError::Closed`]. Reopening replays whatever is on disk.
pub struct FileLogStore {
    config: FileLogConfig,
    state: RwLock<Option<LogState>>,
}

impl FileLogStore {
    /// Open (or create) the log file and replay it
    ///
    /// Only one store may hold a log open at a time; a second open of the
    /// same path fails with [`StorageError::Locked`].
    ///
    /// Bytes after the last complete frame that hold no committed data (a
    /// frame cut short by a crash, or zero-filled space) are truncated
    /// away. Any other damage is reported as [`StorageError::Corrupted`]
    /// and the file is left untouched.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub async fn open(config: FileLogConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let lock = Self::acquire_lock(&config)?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&config.path)
            .await?;

        let file_size = file.metadata().await?.len();
        let replay = Self::replay(&config, file_size).await?;

        if replay.valid_len < file_size {
            warn!(
                file_size,
                valid_len = replay.valid_len,
                "Truncating torn tail of log file"
            );
            file.set_len(replay.valid_len).await?;
            file.sync_all().await?;
        }

        info!(
            records = replay.records,
            transactions = replay.index.len(),
            next_sequence = replay.next_sequence,
            "Opened log file"
        );

        Ok(Self {
            config,
            state: RwLock::new(Some(LogState {
                file,
                len: replay.valid_len,
                next_sequence: replay.next_sequence,
                index: replay.index,
                _lock: lock,
            })),
        })
    }

    /// Take the exclusive lock on the log's lock file
    fn acquire_lock(config: &FileLogConfig) -> Result<std::fs::File, StorageError> {
        let lock_path = config.lock_path();
        let lock = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if !lock.try_lock_exclusive()? {
            return Err(StorageError::Locked(config.path.display().to_string()));
        }
        debug!(lock = %lock_path.display(), "Acquired log file lock");
        Ok(lock)
    }

    /// Scan the whole file, rebuilding the index
    async fn replay(config: &FileLogConfig, file_size: u64) -> Result<Replay, StorageError> {
        let mut reader = BufReader::new(File::open(&config.path).await?);
        let mut index: BTreeMap<TransactionId, TxIndex> = BTreeMap::new();
        let mut next_sequence = 0u64;
        let mut offset = 0u64;
        let mut records = 0usize;

        while offset < file_size {
            let remaining = file_size - offset;
            if remaining < FRAME_HEADER_LEN as u64 {
                warn!(
                    offset,
                    remaining,
                    "Partial frame header at end of file, stopping replay"
                );
                break;
            }

            let mut raw_header = [0u8; FRAME_HEADER_LEN];
            reader.read_exact(&mut raw_header).await?;
            let header = match frame::parse_header(&raw_header) {
                Ok(header) => header,
                Err(e) => {
                    let rest = remaining - FRAME_HEADER_LEN as u64;
                    if raw_header.iter().all(|b| *b == 0)
                        && Self::zero_filled(&mut reader, rest).await?
                    {
                        warn!(offset, remaining, "Zero-filled tail, stopping replay");
                        break;
                    }
                    return Err(StorageError::corrupted(format!(
                        "frame at offset {offset}: {e}"
                    )));
                }
            };

            // The length is checksummed, so a frame that runs past the end
            // was cut short by a crash while it was being written
            let frame_end = offset + (FRAME_HEADER_LEN + header.body_len) as u64;
            if frame_end > file_size {
                warn!(
                    offset,
                    len = header.body_len,
                    "Frame runs past end of file, stopping replay"
                );
                break;
            }

            let mut body = vec![0u8; header.body_len];
            reader.read_exact(&mut body).await?;

            let record = match frame::decode_body(&body, header.body_crc) {
                Ok(record) => record,
                Err(_) if frame_end == file_size && body.iter().all(|b| *b == 0) => {
                    warn!(offset, "Final frame body was never written, stopping replay");
                    break;
                }
                Err(e) => {
                    return Err(StorageError::corrupted(format!(
                        "frame at offset {offset}: {e}"
                    )));
                }
            };

            match record {
                LogRecord::Append(entry) => {
                    next_sequence = next_sequence.max(entry.sequence + 1);
                    let tx = index.entry(entry.transaction_id).or_default();
                    tx.offsets.push(offset);
                    tx.last_created_at_millis = entry.created_at_millis;
                }
                LogRecord::Cleanup { transaction_id } => {
                    index.remove(&transaction_id);
                }
                LogRecord::Checkpoint {
                    next_sequence: checkpoint,
                } => {
                    next_sequence = next_sequence.max(checkpoint);
                }
            }

            records += 1;
            offset = frame_end;
        }

        Ok(Replay {
            index,
            next_sequence,
            valid_len: offset,
            records,
        })
    }

    /// Whether the next `len` bytes of `reader` are all zero
    async fn zero_filled<R>(reader: &mut R, mut len: u64) -> Result<bool, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 8192];
        while len > 0 {
            let n = len.min(chunk.len() as u64) as usize;
            reader.read_exact(&mut chunk[..n]).await?;
            if chunk[..n].iter().any(|b| *b != 0) {
                return Ok(false);
            }
            len -= n as u64;
        }
        Ok(true)
    }

    /// Path of the underlying log file
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration
    pub fn config(&self) -> &FileLogConfig {
        &self.config
    }

    /// Size of the valid log in bytes
    pub async fn file_len(&self) -> Result<u64, StorageError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(state.len)
    }

    /// Write one frame at the end of the log
    ///
    /// On failure the file is cut back to its previous length so a
    /// half-written frame never precedes later appends. If that cut also
    /// fails the state is dropped and the store is closed.
    async fn write_frame(
        config: &FileLogConfig,
        slot: &mut Option<LogState>,
        frame: &[u8],
    ) -> Result<u64, StorageError> {
        let state = slot.as_mut().ok_or(StorageError::Closed)?;
        let offset = state.len;

        let written = async {
            state.file.write_all(frame).await?;
            state.file.flush().await?;
            if config.sync_on_write {
                state.file.sync_data().await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        let Err(e) = written else {
            state.len = offset + frame.len() as u64;
            return Ok(offset);
        };

        warn!(offset, error = %e, "Log write failed, rolling back");
        let rolled_back = async {
            state.file.set_len(offset).await?;
            state.file.sync_data().await
        }
        .await;

        if let Err(rollback) = rolled_back {
            error!(
                offset,
                error = %rollback,
                "Rollback of failed write failed, closing log store"
            );
            *slot = None;
        }
        Err(e.into())
    }

    /// Read the record stored at a frame offset
    async fn read_record(reader: &mut File, offset: u64) -> Result<LogRecord, StorageError> {
        reader.seek(SeekFrom::Start(offset)).await?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let header = frame::parse_header(&header)?;

        let mut body = vec![0u8; header.body_len];
        reader.read_exact(&mut body).await?;
        frame::decode_body(&body, header.body_crc)
    }

    async fn read_entry(
        reader: &mut File,
        offset: u64,
        transaction_id: &TransactionId,
    ) -> Result<LogEntry, StorageError> {
        match Self::read_record(reader, offset).await? {
            LogRecord::Append(entry) if &entry.transaction_id == transaction_id => Ok(entry),
            _ => Err(StorageError::corrupted(format!(
                "index points at offset {offset} which is not an entry of {transaction_id}"
            ))),
        }
    }

    /// Read the given entries through a fresh handle
    async fn read_entries(
        &self,
        transaction_id: &TransactionId,
        offsets: &[u64],
    ) -> Result<Vec<LogEntry>, StorageError> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }

        let mut reader = File::open(&self.config.path).await?;
        let mut entries = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            entries.push(Self::read_entry(&mut reader, offset, transaction_id).await?);
        }
        Ok(entries)
    }

    /// Rewrite the log keeping only live entries
    ///
    /// The new file starts with a checkpoint so sequence numbers keep
    /// increasing after reopen. The swap is an atomic rename; once it has
    /// happened the index describes the new file, and if the new file
    /// cannot be reopened the store is closed.
    #[instrument(skip(self))]
    pub async fn compact(&self) -> Result<CompactionResult, StorageError> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        let temp_path = self.config.path.with_extension("compact");
        info!(path = %temp_path.display(), "Compacting log file");

        let (new_index, new_len, retained) = match self.write_compacted(state, &temp_path).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, &self.config.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        let result = CompactionResult {
            entries_retained: retained,
            bytes_reclaimed: state.len.saturating_sub(new_len),
        };
        state.index = new_index;
        state.len = new_len;

        let reopened = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.config.path)
            .await;
        Self::install_compacted(&mut guard, reopened)?;
        sync_parent_dir(&self.config.path).await?;

        info!(
            retained = result.entries_retained,
            reclaimed = result.bytes_reclaimed,
            "Log compaction complete"
        );
        Ok(result)
    }

    /// Write the checkpoint and live entries to `temp_path`
    async fn write_compacted(
        &self,
        state: &LogState,
        temp_path: &Path,
    ) -> Result<(BTreeMap<TransactionId, TxIndex>, u64, usize), StorageError> {
        let mut reader = File::open(&self.config.path).await?;
        let mut out = File::create(temp_path).await?;
        let mut new_index = BTreeMap::new();
        let mut new_len = 0u64;
        let mut retained = 0usize;

        let checkpoint = frame::encode(&LogRecord::Checkpoint {
            next_sequence: state.next_sequence,
        })?;
        out.write_all(&checkpoint).await?;
        new_len += checkpoint.len() as u64;

        for (transaction_id, tx) in &state.index {
            let mut offsets = Vec::with_capacity(tx.offsets.len());
            for &offset in &tx.offsets {
                let entry = Self::read_entry(&mut reader, offset, transaction_id).await?;
                let frame = frame::encode(&LogRecord::Append(entry))?;
                out.write_all(&frame).await?;
                offsets.push(new_len);
                new_len += frame.len() as u64;
                retained += 1;
            }
            new_index.insert(
                transaction_id.clone(),
                TxIndex {
                    offsets,
                    last_created_at_millis: tx.last_created_at_millis,
                },
            );
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((new_index, new_len, retained))
    }

    /// Point the state at the renamed file, or close the store if it
    /// could not be reopened
    fn install_compacted(
        slot: &mut Option<LogState>,
        reopened: std::io::Result<File>,
    ) -> Result<(), StorageError> {
        match reopened {
            Ok(file) => {
                if let Some(state) = slot.as_mut() {
                    state.file = file;
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Reopen after compaction failed, closing log store");
                *slot = None;
                Err(e.into())
            }
        }
    }
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        File::open(parent).await?.sync_all().await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[async_trait]
impl LogStore for FileLogStore {
    #[instrument(skip(self, payload), fields(tx = %transaction_id, len = payload.len()))]
    async fn append(
        &self,
        transaction_id: &TransactionId,
        payload: Bytes,
    ) -> Result<u64, StorageError> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        let sequence = state.next_sequence;
        let previous = state
            .index
            .get(transaction_id)
            .map(|tx| tx.last_created_at_millis);
        let entry = LogEntry::new(transaction_id.clone(), sequence, payload, previous);
        let created_at = entry.created_at_millis;

        let frame = frame::encode(&LogRecord::Append(entry))?;
        if frame.len() - FRAME_HEADER_LEN > self.config.max_record_size {
            return Err(StorageError::serialization(format!(
                "record of {} bytes exceeds max_record_size {}",
                frame.len() - FRAME_HEADER_LEN,
                self.config.max_record_size
            )));
        }

        let offset = Self::write_frame(&self.config, &mut guard, &frame).await?;

        let state = guard.as_mut().ok_or(StorageError::Closed)?;
        state.next_sequence = sequence + 1;
        let tx = state.index.entry(transaction_id.clone()).or_default();
        tx.offsets.push(offset);
        tx.last_created_at_millis = created_at;

        trace!(sequence, offset, "Appended entry");
        Ok(sequence)
    }

    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Vec<Bytes>, StorageError> {
        let entries = self.entries(transaction_id).await?;
        Ok(entries.into_iter().map(|e| e.payload).collect())
    }

    async fn last_log(&self, transaction_id: &TransactionId) -> Result<Bytes, StorageError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;

        let last = state
            .index
            .get(transaction_id)
            .and_then(|tx| tx.offsets.last().copied())
            .ok_or_else(|| StorageError::not_found(transaction_id.as_str()))?;

        let mut reader = File::open(&self.config.path).await?;
        let entry = Self::read_entry(&mut reader, last, transaction_id).await?;
        Ok(entry.payload)
    }

    async fn list_keys(&self) -> Result<Vec<TransactionId>, StorageError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(state.index.keys().cloned().collect())
    }

    #[instrument(skip(self), fields(tx = %transaction_id))]
    async fn cleanup(&self, transaction_id: &TransactionId) -> Result<(), StorageError> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        if !state.index.contains_key(transaction_id) {
            return Ok(());
        }

        let frame = frame::encode(&LogRecord::Cleanup {
            transaction_id: transaction_id.clone(),
        })?;
        Self::write_frame(&self.config, &mut guard, &frame).await?;

        let state = guard.as_mut().ok_or(StorageError::Closed)?;
        if let Some(removed) = state.index.remove(transaction_id) {
            debug!(removed = removed.offsets.len(), "Cleaned up transaction");
        }
        Ok(())
    }

    async fn entries(&self, transaction_id: &TransactionId) -> Result<Vec<LogEntry>, StorageError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;

        let offsets = match state.index.get(transaction_id) {
            Some(tx) => tx.offsets.as_slice(),
            None => return Ok(Vec::new()),
        };
        self.read_entries(transaction_id, offsets).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.state.write().await;
        if let Some(mut state) = guard.take() {
            state.file.flush().await?;
            state.file.sync_all().await?;
            debug!(path = %self.config.path.display(), "Closed log file");
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

    async fn create_test_store() -> (FileLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = FileLogConfig::at(temp_dir.path().join("saga.log"));
        let store = FileLogStore::open(config).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_append_and_lookup() {
        let (store, _temp) = create_test_store().await;

        for step in ["start", "step1", "commit"] {
            store.append(&tx("tx1"), Bytes::from(step)).await.unwrap();
        }

        let payloads = store.lookup(&tx("tx1")).await.unwrap();
        assert_eq!(payloads, vec!["start", "step1", "commit"]);
        assert_eq!(store.last_log(&tx("tx1")).await.unwrap(), "commit");
    }

    #[tokio::test]
    async fn test_persistence_and_replay() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            for i in 0..5 {
                store
                    .append(&tx("a"), Bytes::from(format!("a{i}")))
                    .await
                    .unwrap();
            }
            store.append(&tx("b"), Bytes::from("b0")).await.unwrap();
            store.cleanup(&tx("b")).await.unwrap();
            store.close().await.unwrap();
        }

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec![tx("a")]);
        assert_eq!(store.lookup(&tx("a")).await.unwrap().len(), 5);
        assert!(store.lookup(&tx("b")).await.unwrap().is_empty());

        // Sequence numbers continue past the replayed ones
        let seq = store.append(&tx("c"), Bytes::from("c0")).await.unwrap();
        assert_eq!(seq, 6);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        let good_len = {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            store.append(&tx("a"), Bytes::from("kept")).await.unwrap();
            let len = store.file_len().await.unwrap();
            store.close().await.unwrap();
            len
        };

        // Simulate a crash halfway through writing a second frame
        let frame = frame::encode(&LogRecord::Append(LogEntry::new(
            tx("a"),
            1,
            Bytes::from("lost"),
            None,
        )))
        .unwrap();
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(&frame[..frame.len() / 2]);
        tokio::fs::write(&path, &raw).await.unwrap();

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.lookup(&tx("a")).await.unwrap(), vec!["kept"]);
        assert_eq!(store.file_len().await.unwrap(), good_len);

        store.append(&tx("a"), Bytes::from("next")).await.unwrap();
        assert_eq!(store.lookup(&tx("a")).await.unwrap(), vec!["kept", "next"]);
    }

    #[tokio::test]
    async fn test_corruption_before_tail_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            store.append(&tx("a"), Bytes::from("first")).await.unwrap();
            store.append(&tx("a"), Bytes::from("second")).await.unwrap();
            store.close().await.unwrap();
        }

        // Flip a byte inside the first frame's body
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw[FRAME_HEADER_LEN + 2] ^= 0xFF;
        tokio::fs::write(&path, &raw).await.unwrap();

        let result = FileLogStore::open(FileLogConfig::at(&path)).await;
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_damaged_length_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            for step in ["start", "step1", "commit"] {
                store.append(&tx("tx1"), Bytes::from(step)).await.unwrap();
            }
            store.close().await.unwrap();
        }

        // One flipped bit in the first frame's length field
        let mut raw = tokio::fs::read(&path).await.unwrap();
        let len_before = raw.len() as u64;
        raw[1] ^= 0x01;
        tokio::fs::write(&path, &raw).await.unwrap();

        let result = FileLogStore::open(FileLogConfig::at(&path)).await;
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
        // Committed entries stay on disk for inspection
        let len_after = tokio::fs::metadata(&path).await.unwrap().len();
        assert_eq!(len_after, len_before);
    }

    #[tokio::test]
    async fn test_damaged_final_frame_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            store.append(&tx("a"), Bytes::from("first")).await.unwrap();
            store.append(&tx("a"), Bytes::from("commit")).await.unwrap();
            store.close().await.unwrap();
        }

        // The last frame was fully written and acknowledged, so a bad
        // checksum there is damage, not a torn write
        let mut raw = tokio::fs::read(&path).await.unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        tokio::fs::write(&path, &raw).await.unwrap();

        let result = FileLogStore::open(FileLogConfig::at(&path)).await;
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_zero_filled_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        let good_len = {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            store.append(&tx("a"), Bytes::from("kept")).await.unwrap();
            let len = store.file_len().await.unwrap();
            store.close().await.unwrap();
            len
        };

        // Space the filesystem extended but the crashed write never filled
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(&[0u8; 4096]);
        tokio::fs::write(&path, &raw).await.unwrap();

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.lookup(&tx("a")).await.unwrap(), vec!["kept"]);
        assert_eq!(store.file_len().await.unwrap(), good_len);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), good_len);
    }

    #[tokio::test]
    async fn test_lower_max_record_size_still_opens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            store.append(&tx("a"), Bytes::from(vec![7u8; 1024])).await.unwrap();
            store.append(&tx("a"), Bytes::from("small")).await.unwrap();
            store.close().await.unwrap();
        }

        let config = FileLogConfig {
            max_record_size: 64,
            ..FileLogConfig::at(&path)
        };
        let store = FileLogStore::open(config).await.unwrap();
        let payloads = store.lookup(&tx("a")).await.unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].len(), 1024);

        // The limit still applies to new writes
        let err = store
            .append(&tx("a"), Bytes::from(vec![7u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_second_open_is_locked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        store.append(&tx("a"), Bytes::from("start")).await.unwrap();

        let second = FileLogStore::open(FileLogConfig::at(&path)).await;
        assert!(matches!(second, Err(StorageError::Locked(_))));

        // Closing releases the lock
        store.close().await.unwrap();
        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.lookup(&tx("a")).await.unwrap(), vec!["start"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_closes_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        store.append(&tx("a"), Bytes::from("kept")).await.unwrap();

        // A read-only handle fails both the write and the truncate
        {
            let mut guard = store.state.write().await;
            guard.as_mut().unwrap().file = File::open(&path).await.unwrap();
        }

        let err = store.append(&tx("a"), Bytes::from("lost")).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(matches!(
            store.append(&tx("a"), Bytes::from("late")).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.lookup(&tx("a")).await, Err(StorageError::Closed)));

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.lookup(&tx("a")).await.unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_failed_reopen_after_compaction_closes_store() {
        let (store, _temp) = create_test_store().await;
        store.append(&tx("a"), Bytes::from("start")).await.unwrap();

        {
            let mut guard = store.state.write().await;
            let err = FileLogStore::install_compacted(
                &mut *guard,
                Err(std::io::Error::other("reopen failed")),
            )
            .unwrap_err();
            assert!(matches!(err, StorageError::Io(_)));
            assert!(guard.is_none());
        }

        assert!(matches!(
            store.append(&tx("a"), Bytes::from("late")).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.file_len().await, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn test_compaction() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saga.log");

        {
            let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
            for i in 0..50 {
                let key = if i % 5 == 0 { "keep" } else { "drop" };
                store
                    .append(&tx(key), Bytes::from(format!("{key}{i}")))
                    .await
                    .unwrap();
            }
            store.cleanup(&tx("drop")).await.unwrap();

            let result = store.compact().await.unwrap();
            assert_eq!(result.entries_retained, 10);
            assert!(result.bytes_reclaimed > 0);

            assert_eq!(store.lookup(&tx("keep")).await.unwrap().len(), 10);
            assert_eq!(store.append(&tx("keep"), Bytes::from("x")).await.unwrap(), 50);
        }

        let store = FileLogStore::open(FileLogConfig::at(&path)).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec![tx("keep")]);
        assert_eq!(store.lookup(&tx("keep")).await.unwrap().len(), 11);
        assert_eq!(store.append(&tx("keep"), Bytes::from("y")).await.unwrap(), 51);
    }

    #[tokio::test]
    async fn test_oversized_record_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = FileLogConfig {
            max_record_size: 64,
            ..FileLogConfig::at(temp_dir.path().join("saga.log"))
        };
        let store = FileLogStore::open(config).await.unwrap();

        let err = store
            .append(&tx("a"), Bytes::from(vec![0u8; 128]))
            .await
            .unwrap_err();
        assert!(err.is_storage_failure());
        assert!(store.lookup(&tx("a")).await.unwrap().is_empty());
        assert_eq!(store.file_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_of_unknown_key_writes_nothing() {
        let (store, _temp) = create_test_store().await;
        store.cleanup(&tx("ghost")).await.unwrap();
        assert_eq!(store.file_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let (store, _temp) = create_test_store().await;
        store.close().await.unwrap();
        assert!(matches!(
            store.append(&tx("a"), Bytes::from("x")).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.list_keys().await, Err(StorageError::Closed)));
        store.close().await.unwrap();
    }
}
