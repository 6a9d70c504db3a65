//! # Engine — the coordinating facade
//!
//! Ties the memtable, WAL and SSTables together into a single embeddable
//! key-value store rooted at a data directory:
//!
//! ```text
//! data_dir/wal.log        write-ahead log
//! data_dir/NNNNNN.sst     tables, six-digit zero-padded file id
//! data_dir/tmp_NNNNNN.sst transient build files, removed at open
//! ```
//!
//! Writes go WAL first, then memtable, then trigger a flush once the
//! memtable crosses the size threshold. Reads consult the memtable, then the
//! tables newest to oldest, stopping at the first definitive answer (a live
//! value or a tombstone). On open, existing tables are discovered from the
//! directory and the WAL is replayed to rebuild the memtable.
//!
//! The engine is single-threaded: every operation takes `&self` or
//! `&mut self` and runs to completion on the caller's thread.

use anyhow::{Context, Result};
use memtable::{MemTable, MemValue};
use sstable::{Probe, SSTable, SSTableWriter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wal::{Wal, WalRecord};

/// Default memtable size at which a flush is triggered.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Name of the write-ahead log inside the data directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Diagnostic description of one opened table, newest first in
/// [`Engine::tables`].
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub path: PathBuf,
    pub file_id: u64,
    pub index_len: usize,
}

/// A single-node LSM storage engine.
///
/// For any key the visible value is the most recent mutation: the memtable
/// shadows every table, a higher file id shadows a lower one, and a
/// tombstone at any layer occludes all older layers.
pub struct Engine {
    data_dir: PathBuf,
    flush_threshold: usize,
    mem: MemTable,
    wal: Wal,
    /// Opened tables, newest (highest file id) first.
    tables: Vec<SSTable>,
}

impl Engine {
    /// Opens the engine rooted at `data_dir`, creating the directory on
    /// first use.
    ///
    /// Discovers existing tables (files whose six-digit stem parses as an
    /// integer, opened newest first), removes temp files orphaned by an
    /// interrupted flush, opens the WAL, and replays it into the memtable.
    pub fn open<P: AsRef<Path>>(data_dir: P, flush_threshold: usize) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        remove_orphan_temp_files(&data_dir)?;
        let tables = load_tables(&data_dir)?;

        let wal = Wal::open(data_dir.join(WAL_FILE_NAME))?;
        let mut mem = MemTable::new();
        wal.replay(|rec| match rec {
            WalRecord::Put { key, value } => mem.put(key, value),
            WalRecord::Del { key } => mem.del(key),
        })?;

        debug!(
            dir = %data_dir.display(),
            tables = tables.len(),
            replayed = mem.len(),
            "engine opened"
        );
        Ok(Self {
            data_dir,
            flush_threshold,
            mem,
            wal,
            tables,
        })
    }

    /// Inserts or overwrites a key.
    ///
    /// The WAL append happens first; if it fails the memtable is untouched
    /// and the operation fails. Crossing the flush threshold triggers a
    /// flush before returning.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.wal.append_put(key, value)?;
        self.mem.put(key.to_vec(), value.to_vec());
        self.flush_if_needed()
    }

    /// Deletes a key by recording a tombstone. WAL first, as with
    /// [`put`](Engine::put).
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        self.wal.append_del(key)?;
        self.mem.del(key.to_vec());
        self.flush_if_needed()
    }

    /// Looks up a key across all layers.
    ///
    /// Consults the memtable first, then the tables newest to oldest. A
    /// tombstone anywhere stops the search: the key is deleted no matter
    /// what older tables still hold. Tombstones are never surfaced to the
    /// caller; a deleted key reads as `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.mem.get(key) {
            Some(MemValue::Put(v)) => return Ok(Some(v.clone())),
            Some(MemValue::Del) => return Ok(None),
            None => {}
        }

        for table in &self.tables {
            match table.probe(key)? {
                Probe::Put(v) => return Ok(Some(v)),
                Probe::Tombstone => return Ok(None),
                Probe::Absent => continue,
            }
        }
        Ok(None)
    }

    /// Persists the memtable as a new table and resets the WAL.
    ///
    /// A no-op on an empty memtable. On any failure the memtable and WAL are
    /// left untouched and consistent with each other; the flush may simply
    /// be retried.
    pub fn flush(&mut self) -> Result<()> {
        let mut snap = Vec::new();
        self.mem.snapshot(&mut snap);
        if snap.is_empty() {
            return Ok(());
        }

        // The snapshot of an ordered memtable is already sorted and unique;
        // normalizing anyway keeps the builder's precondition honest against
        // alternative memtable implementations.
        snap.sort_by(|a, b| a.0.cmp(&b.0));
        snap.dedup_by(|a, b| a.0 == b.0);

        let file_id = self.next_file_id()?;
        let path = SSTableWriter::build(&self.data_dir, file_id, &snap)
            .with_context(|| format!("building sstable {:06}", file_id))?;
        let table = SSTable::open(&path)?;
        self.tables.insert(0, table);

        self.wal.reset()?;
        self.mem.clear();
        info!(file = %path.display(), entries = snap.len(), "flushed memtable");
        Ok(())
    }

    /// Forces all WAL appends issued so far onto stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.wal.sync()?;
        Ok(())
    }

    /// Describes the opened tables, newest first.
    pub fn tables(&self) -> Vec<TableInfo> {
        self.tables
            .iter()
            .map(|t| TableInfo {
                path: t.path().to_path_buf(),
                file_id: t.file_id(),
                index_len: t.index_len(),
            })
            .collect()
    }

    /// Number of entries currently buffered in the memtable.
    pub fn mem_entries(&self) -> usize {
        self.mem.len()
    }

    /// Tracked byte size of the memtable.
    pub fn mem_bytes(&self) -> usize {
        self.mem.bytes()
    }

    /// The configured flush threshold in bytes.
    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// The engine's data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn flush_if_needed(&mut self) -> Result<()> {
        if self.mem.bytes() >= self.flush_threshold {
            self.flush()
        } else {
            Ok(())
        }
    }

    // 1 + the largest id among opened tables and parseable ids in the
    // directory, so ids stay monotone even across files dropped in out of
    // band.
    fn next_file_id(&self) -> Result<u64> {
        let mut max_id = self.tables.iter().map(|t| t.file_id()).max().unwrap_or(0);
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = parse_file_id(&entry.path()) {
                max_id = max_id.max(id);
            }
        }
        Ok(max_id + 1)
    }
}

// "000042.sst" → Some(42); temp files and foreign files → None.
fn parse_file_id(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != "sst" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn load_tables(dir: &Path) -> Result<Vec<SSTable>> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(id) = parse_file_id(&path) {
            found.push((id, path));
        }
    }
    // Newest first; opening in this order keeps the vector front as the
    // freshest table with no second sort.
    found.sort_by(|a, b| b.0.cmp(&a.0));

    let mut tables = Vec::with_capacity(found.len());
    for (_, path) in found {
        let table = SSTable::open(&path)
            .with_context(|| format!("opening sstable {}", path.display()))?;
        tables.push(table);
    }
    Ok(tables)
}

// A crash between build and rename leaves a tmp_NNNNNN.sst behind. Its stem
// never parses as an id, so it is invisible to discovery; removing it here
// just reclaims the space.
fn remove_orphan_temp_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("tmp_") && name.ends_with(".sst") {
            let path = entry.path();
            warn!(file = %path.display(), "removing orphan temp table");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
