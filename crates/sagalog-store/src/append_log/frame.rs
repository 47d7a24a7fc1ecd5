//! Record framing for the append-only log file
//!
//! ```text
//! [4 bytes: len BE][4 bytes: crc32(len) BE][4 bytes: crc32(body) BE][len bytes: postcard(LogRecord)]
//! ```
//!
//! The header checksum covers the length field, so a length that reads
//! back at all is the length that was written. The body checksum covers
//! the body only. A frame that fails either check is never applied.

use serde::{Deserialize, Serialize};

use crate::entry::{LogEntry, TransactionId};
use crate::error::StorageError;

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 12;

/// One record in the log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A new entry appended to a transaction
    Append(LogEntry),
    /// Every earlier entry of the transaction is deleted
    Cleanup {
        /// Transaction being cleaned up
        transaction_id: TransactionId,
    },
    /// Written first by compaction so that sequence numbers of entries
    /// dropped from the file are never handed out again
    Checkpoint {
        /// Lower bound for the next sequence number
        next_sequence: u64,
    },
}

/// Verified contents of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the body that follows
    pub body_len: usize,
    /// Expected checksum of the body
    pub body_crc: u32,
}

/// Serialize a record into a complete frame
pub fn encode(record: &LogRecord) -> Result<Vec<u8>, StorageError> {
    let body =
        postcard::to_allocvec(record).map_err(|e| StorageError::serialization(e.to_string()))?;

    let len = u32::try_from(body.len())
        .map_err(|_| StorageError::serialization("record larger than 4 GiB"))?
        .to_be_bytes();

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&crc32fast::hash(&len).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Verify a frame header and split it into length and body checksum
///
/// # Errors
///
/// [`StorageError::Corrupted`] when the length does not match its checksum.
pub fn parse_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<FrameHeader, StorageError> {
    let len = [header[0], header[1], header[2], header[3]];
    let len_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let body_crc = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

    let actual = crc32fast::hash(&len);
    if actual != len_crc {
        return Err(StorageError::corrupted(format!(
            "header checksum mismatch: expected {len_crc:08x}, got {actual:08x}"
        )));
    }

    Ok(FrameHeader {
        body_len: u32::from_be_bytes(len) as usize,
        body_crc,
    })
}

/// Verify and decode a frame body
pub fn decode_body(body: &[u8], expected_crc: u32) -> Result<LogRecord, StorageError> {
    let actual = crc32fast::hash(body);
    if actual != expected_crc {
        return Err(StorageError::corrupted(format!(
            "checksum mismatch: expected {expected_crc:08x}, got {actual:08x}"
        )));
    }
    postcard::from_bytes(body).map_err(|e| StorageError::deserialization(e.to_string()))
}
