//! # SSTable — Sorted String Table
//!
//! Immutable, on-disk storage files for the StrataKV storage engine.
//!
//! When the in-memory memtable exceeds its entry threshold the engine
//! flushes it to disk as an SSTable. SSTables are **write-once,
//! read-many** — once created they are never modified.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ DATA SECTION (partition blobs, key order)     │
//! │                                               │
//! │ count (u32)                                   │
//! │   key_len (u32) | key | command frame         │
//! │   ... at most part_size entries ...           │
//! │                                               │
//! │ ... repeated per partition ...                │
//! ├───────────────────────────────────────────────┤
//! │ SPARSE INDEX (first key of each partition)    │
//! │                                               │
//! │ count (u32)                                   │
//! │   key_len (u32) | key | offset (u64)          │
//! │                       | length (u64)          │
//! ├───────────────────────────────────────────────┤
//! │ FOOTER (always last 56 bytes)                 │
//! │                                               │
//! │ version | data_start | data_len | index_start │
//! │ | index_len | part_size | magic   (u64 each)  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. A lookup binary-searches the in-memory
//! sparse index and reads at most two adjacent partitions in one pread,
//! regardless of table size.

use command::FrameError;
use thiserror::Error;

mod format;
mod reader;
mod writer;

pub use format::{Position, TableMeta, FOOTER_BYTES, TABLE_MAGIC, TABLE_VERSION};
pub use reader::SSTableReader;
pub use writer::SSTableWriter;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Footer, index, or partition contents failed validation.
    #[error("corrupt table: {0}")]
    Corrupt(String),
    /// Build input keys were not strictly increasing.
    #[error("duplicate or out-of-order key in build input")]
    DuplicateKey,
    /// Build input contained no commands.
    #[error("refusing to build an empty table")]
    EmptyInput,
}

impl From<FrameError> for TableError {
    fn from(e: FrameError) -> Self {
        TableError::Corrupt(e.to_string())
    }
}
