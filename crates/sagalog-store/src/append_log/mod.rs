//! Append-only file log storage
//!
//! Every append and cleanup is written as a new record at the end of a
//! single log file; nothing already written is modified in place.
//!
//! ## Features
//!
//! - Sequential, checksummed append-only writes
//! - fsync before an append or cleanup returns (configurable)
//! - Recovery through replay, with torn-tail truncation
//! - Exclusive lock file so only one store writes the log at a time
//! - Compaction that drops cleaned-up transactions
//!
//! ## Storage Format
//!
//! Each log file contains length-prefixed, checksummed, postcard-serialized
//! records. The length carries its own checksum so a damaged length is
//! never mistaken for a torn tail:
//! ```text
//! [4 bytes: len][4 bytes: crc32(len)][4 bytes: crc32(record)][len bytes: record][...]
//! ```

mod file_log;
pub mod frame;

pub use file_log::{CompactionResult, FileLogConfig, FileLogStore};
pub use frame::LogRecord;
