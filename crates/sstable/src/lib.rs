//! # SSTable — Sorted String Table
//!
//! Immutable, on-disk storage files for the ShoalKV storage engine.
//!
//! When the in-memory [`memtable::MemTable`] crosses its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are **write-once,
//! read-many** — once renamed into place they are never modified.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ HEADER                                         │
//! │ magic (u32 LE = "KVST") | version (u32 LE = 1) │
//! ├────────────────────────────────────────────────┤
//! │ DATA SECTION (strictly ascending key order)    │
//! │                                                │
//! │ klen (u32) | kind (u8) | vlen (u32)            │
//! │ key bytes | value bytes (none for tombstones)  │
//! │                                                │
//! │ ... repeated for each entry ...                │
//! ├────────────────────────────────────────────────┤
//! │ SPARSE INDEX (one record per 64 data entries)  │
//! │                                                │
//! │ klen (u32) | key bytes | offset (u64)          │
//! ├────────────────────────────────────────────────┤
//! │ FOOTER (always last 20 bytes)                  │
//! │                                                │
//! │ index_offset (u64) | index_count (u32)         │
//! │ magic (u32) | version (u32)                    │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. A lookup binary-searches the in-memory
//! sparse index for the greatest indexed key at or before the target, then
//! scans forward through at most 64 entries.

mod format;
mod reader;
mod writer;

pub use format::{
    table_path, temp_path, FOOTER_BYTES, HEADER_BYTES, INDEX_INTERVAL, SSTABLE_MAGIC,
    SSTABLE_VERSION,
};
pub use reader::{Probe, SSTable};
pub use writer::SSTableWriter;
