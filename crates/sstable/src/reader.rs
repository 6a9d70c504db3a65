use anyhow::{bail, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::KIND_PUT;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{read_footer, FOOTER_BYTES, HEADER_BYTES, SSTABLE_MAGIC, SSTABLE_VERSION};

/// Outcome of probing a single table for a key.
///
/// The three-way answer is what lets the engine stop at the right layer: a
/// [`Probe::Tombstone`] means the key is deleted as of this table and older
/// tables must not be consulted, while [`Probe::Absent`] means this table
/// simply knows nothing about the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The key holds this live value in this table.
    Put(Vec<u8>),
    /// The key is deleted as of this table.
    Tombstone,
    /// The key does not appear in this table.
    Absent,
}

struct IndexEntry {
    key: Vec<u8>,
    offset: u64,
}

/// Read-side handle to one immutable table.
///
/// On [`open`](SSTable::open) the footer is validated and the sparse index
/// (one `(key, offset)` record per 64 data entries) is loaded into memory.
/// The data file is **not** kept open between lookups — each
/// [`probe`](SSTable::probe) opens the file, seeks near the target via the
/// index, scans forward, and closes the handle. This keeps ownership simple
/// and avoids holding long-lived file descriptors.
pub struct SSTable {
    /// Path to the `.sst` file on disk.
    path: PathBuf,
    /// Parsed from the `NNNNNN` filename stem; 0 if the stem does not parse.
    file_id: u64,
    /// Sparse index, ascending by key.
    index: Vec<IndexEntry>,
    /// First byte past the data section (== the footer's `index_offset`);
    /// forward scans stop here.
    data_end: u64,
}

impl SSTable {
    /// Opens a table file and loads its sparse index into memory.
    ///
    /// # Validation
    ///
    /// - The file must be at least header + footer sized.
    /// - The footer magic and version must match.
    /// - `index_offset` must land between the header and the footer.
    /// - All `index_count` index records must read fully.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut f = File::open(&path)?;
        let filesize = f.metadata()?.len();
        if filesize < HEADER_BYTES + FOOTER_BYTES {
            bail!("sstable {} too small for header and footer", path.display());
        }

        let (index_offset, index_count, magic, version) = read_footer(&mut f)?;
        if magic != SSTABLE_MAGIC || version != SSTABLE_VERSION {
            bail!("bad sstable magic/version in {}", path.display());
        }
        if index_offset < HEADER_BYTES || index_offset > filesize - FOOTER_BYTES {
            bail!("sstable index offset out of range in {}", path.display());
        }

        f.seek(SeekFrom::Start(index_offset))?;
        let mut rdr = BufReader::new(f);
        let mut index = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let klen = rdr.read_u32::<LittleEndian>()?;
            let mut key = vec![0u8; klen as usize];
            rdr.read_exact(&mut key)?;
            let offset = rdr.read_u64::<LittleEndian>()?;
            index.push(IndexEntry { key, offset });
        }

        Ok(Self {
            path,
            file_id,
            index,
            data_end: index_offset,
        })
    }

    // Greatest indexed key <= target; entries before the first indexed key
    // start at the header end.
    fn seek_offset(&self, key: &[u8]) -> u64 {
        let idx = self.index.partition_point(|e| e.key.as_slice() <= key);
        if idx == 0 {
            HEADER_BYTES
        } else {
            self.index[idx - 1].offset
        }
    }

    /// Point lookup distinguishing live value, tombstone, and absence.
    ///
    /// Seeks to the greatest indexed key at or before the target, then scans
    /// forward. Keys in the data section are strictly increasing, so the scan
    /// stops as soon as it reads a key past the target or reaches the end of
    /// the data section.
    ///
    /// I/O failures are surfaced as errors; only an unexpectedly short data
    /// section is folded into [`Probe::Absent`].
    pub fn probe(&self, key: &[u8]) -> Result<Probe> {
        let file = File::open(&self.path)?;
        let mut rdr = BufReader::new(file);
        let mut pos = self.seek_offset(key);
        rdr.seek(SeekFrom::Start(pos))?;

        while pos < self.data_end {
            let (klen, kind, vlen) = match read_entry_prefix(&mut rdr)? {
                Some(prefix) => prefix,
                None => return Ok(Probe::Absent),
            };

            let mut entry_key = vec![0u8; klen as usize];
            if !read_full(&mut rdr, &mut entry_key)? {
                return Ok(Probe::Absent);
            }

            // Keys are monotone: once past the target it cannot appear later.
            if entry_key.as_slice() > key {
                return Ok(Probe::Absent);
            }

            if entry_key.as_slice() == key {
                if kind == KIND_PUT {
                    let mut value = vec![0u8; vlen as usize];
                    if !read_full(&mut rdr, &mut value)? {
                        return Ok(Probe::Absent);
                    }
                    return Ok(Probe::Put(value));
                }
                return Ok(Probe::Tombstone);
            }

            // Not the target: skip the value bytes (vlen is 0 for tombstones).
            rdr.seek_relative(vlen as i64)?;
            pos += 4 + 1 + 4 + klen as u64 + vlen as u64;
        }

        Ok(Probe::Absent)
    }

    /// Point lookup collapsing tombstone and absence to `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.probe(key)? {
            Probe::Put(v) => Ok(Some(v)),
            Probe::Tombstone | Probe::Absent => Ok(None),
        }
    }

    /// Path of the table file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id parsed from the filename; larger ids are newer.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Number of sparse-index records held in memory.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}

// Reads the fixed 9-byte entry prefix klen | kind | vlen; Ok(None) on EOF.
fn read_entry_prefix<R: Read>(r: &mut R) -> io::Result<Option<(u32, u8, u32)>> {
    let mut buf = [0u8; 9];
    match r.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let klen = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let kind = buf[4];
    let vlen = u32::from_le_bytes(buf[5..9].try_into().unwrap());
    Ok(Some((klen, kind, vlen)))
}

// Reads exactly buf.len() bytes; Ok(false) on EOF mid-read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SSTableWriter;
    use memtable::MemValue;
    use tempfile::tempdir;

    fn sample_entries() -> Vec<(Vec<u8>, MemValue)> {
        vec![
            (b"a".to_vec(), MemValue::Put(b"apple".to_vec())),
            (b"b".to_vec(), MemValue::Put(b"banana".to_vec())),
            (b"c".to_vec(), MemValue::Put(Vec::new())),
            (b"d".to_vec(), MemValue::Del),
        ]
    }

    // -------------------- Basic open & probe --------------------

    #[test]
    fn open_and_probe_entries() -> Result<()> {
        let dir = tempdir()?;
        let path = SSTableWriter::build(dir.path(), 1, &sample_entries())?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.probe(b"a")?, Probe::Put(b"apple".to_vec()));
        assert_eq!(table.probe(b"b")?, Probe::Put(b"banana".to_vec()));
        assert_eq!(table.probe(b"c")?, Probe::Put(Vec::new()));
        assert_eq!(table.probe(b"d")?, Probe::Tombstone);
        assert_eq!(table.probe(b"nope")?, Probe::Absent);
        Ok(())
    }

    #[test]
    fn get_collapses_tombstone_and_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = SSTableWriter::build(dir.path(), 1, &sample_entries())?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.get(b"a")?, Some(b"apple".to_vec()));
        assert_eq!(table.get(b"d")?, None);
        assert_eq!(table.get(b"zzz")?, None);
        Ok(())
    }

    #[test]
    fn probe_key_before_all_entries() -> Result<()> {
        let dir = tempdir()?;
        let entries = vec![(b"mm".to_vec(), MemValue::Put(b"v".to_vec()))];
        let path = SSTableWriter::build(dir.path(), 1, &entries)?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.probe(b"aa")?, Probe::Absent);
        Ok(())
    }

    #[test]
    fn probe_key_after_all_entries() -> Result<()> {
        let dir = tempdir()?;
        let path = SSTableWriter::build(dir.path(), 1, &sample_entries())?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.probe(b"zzz")?, Probe::Absent);
        Ok(())
    }

    #[test]
    fn empty_table_probes_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = SSTableWriter::build(dir.path(), 1, &[])?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.index_len(), 0);
        assert_eq!(table.probe(b"anything")?, Probe::Absent);
        Ok(())
    }

    // -------------------- Sparse index --------------------

    #[test]
    fn sparse_index_boundaries() -> Result<()> {
        let dir = tempdir()?;
        let entries: Vec<(Vec<u8>, MemValue)> = (0..130u32)
            .map(|i| {
                (
                    format!("key{:03}", i).into_bytes(),
                    MemValue::Put(format!("val{:03}", i).into_bytes()),
                )
            })
            .collect();
        let path = SSTableWriter::build(dir.path(), 1, &entries)?;
        let table = SSTable::open(&path)?;

        assert_eq!(table.index_len(), 3); // entries 0, 64, 128

        // First entry, entries on either side of an index record, and the
        // last entry all resolve; one past the end does not.
        assert_eq!(table.probe(b"key000")?, Probe::Put(b"val000".to_vec()));
        assert_eq!(table.probe(b"key063")?, Probe::Put(b"val063".to_vec()));
        assert_eq!(table.probe(b"key064")?, Probe::Put(b"val064".to_vec()));
        assert_eq!(table.probe(b"key127")?, Probe::Put(b"val127".to_vec()));
        assert_eq!(table.probe(b"key129")?, Probe::Put(b"val129".to_vec()));
        assert_eq!(table.probe(b"key130")?, Probe::Absent);
        Ok(())
    }

    #[test]
    fn indexed_keys_resolve_to_their_entries() -> Result<()> {
        let dir = tempdir()?;
        let entries: Vec<(Vec<u8>, MemValue)> = (0..200u32)
            .map(|i| {
                (
                    format!("key{:03}", i).into_bytes(),
                    MemValue::Put(i.to_le_bytes().to_vec()),
                )
            })
            .collect();
        let path = SSTableWriter::build(dir.path(), 1, &entries)?;
        let table = SSTable::open(&path)?;

        for i in [0u32, 64, 128, 192] {
            let key = format!("key{:03}", i).into_bytes();
            assert_eq!(table.probe(&key)?, Probe::Put(i.to_le_bytes().to_vec()));
        }
        Ok(())
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn open_file_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.sst");
        std::fs::write(&path, b"short").unwrap();

        assert!(SSTable::open(&path).is_err());
    }

    #[test]
    fn open_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.sst");

        // Header + footer sized, but the footer magic is wrong.
        let mut data = vec![0u8; (HEADER_BYTES + FOOTER_BYTES) as usize];
        let magic_at = data.len() - 8;
        data[magic_at..magic_at + 4].copy_from_slice(&[0xBA, 0xAD, 0xF0, 0x0D]);
        std::fs::write(&path, &data).unwrap();

        assert!(SSTable::open(&path).is_err());
    }

    #[test]
    fn open_index_offset_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.sst");

        let mut data = Vec::new();
        data.extend_from_slice(&SSTABLE_MAGIC.to_le_bytes());
        data.extend_from_slice(&SSTABLE_VERSION.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes()); // index_offset
        data.extend_from_slice(&0u32.to_le_bytes()); // index_count
        data.extend_from_slice(&SSTABLE_MAGIC.to_le_bytes());
        data.extend_from_slice(&SSTABLE_VERSION.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        assert!(SSTable::open(&path).is_err());
    }

    #[test]
    fn open_nonexistent_file() {
        let dir = tempdir().unwrap();
        assert!(SSTable::open(dir.path().join("missing.sst")).is_err());
    }

    // -------------------- File id --------------------

    #[test]
    fn file_id_parsed_from_stem() -> Result<()> {
        let dir = tempdir()?;
        let path = SSTableWriter::build(dir.path(), 42, &sample_entries())?;
        let table = SSTable::open(&path)?;
        assert_eq!(table.file_id(), 42);
        Ok(())
    }

    #[test]
    fn unparseable_stem_yields_id_zero() -> Result<()> {
        let dir = tempdir()?;
        let built = SSTableWriter::build(dir.path(), 1, &sample_entries())?;
        let renamed = dir.path().join("copy.sst");
        std::fs::rename(built, &renamed)?;

        let table = SSTable::open(&renamed)?;
        assert_eq!(table.file_id(), 0);
        Ok(())
    }

    // -------------------- Large values --------------------

    #[test]
    fn large_value_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let big = vec![b'x'; 500_000];
        let entries = vec![(b"big".to_vec(), MemValue::Put(big.clone()))];
        let path = SSTableWriter::build(dir.path(), 1, &entries)?;

        let table = SSTable::open(&path)?;
        assert_eq!(table.probe(b"big")?, Probe::Put(big));
        Ok(())
    }

    #[test]
    fn repeated_probes_reopen_the_file() -> Result<()> {
        let dir = tempdir()?;
        let entries: Vec<(Vec<u8>, MemValue)> = (0..100u32)
            .map(|i| (format!("k{:03}", i).into_bytes(), MemValue::Put(b"v".to_vec())))
            .collect();
        let path = SSTableWriter::build(dir.path(), 1, &entries)?;
        let table = SSTable::open(&path)?;

        for _ in 0..2 {
            for i in 0..100u32 {
                let key = format!("k{:03}", i).into_bytes();
                assert_eq!(table.probe(&key)?, Probe::Put(b"v".to_vec()));
            }
        }
        Ok(())
    }
}
