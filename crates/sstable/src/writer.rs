use anyhow::{bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use memtable::MemValue;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use crate::format::{table_path, temp_path, write_footer, write_header, INDEX_INTERVAL};

/// Builds immutable SSTable files from sorted snapshots.
///
/// The writer is stateless — all work happens inside the single static method
/// [`build`](SSTableWriter::build). The write is crash-safe: data goes to a
/// temporary file first, is fsynced, and is then atomically renamed into
/// place with a directory fsync on either side of the rename.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Writes `entries` to a new table `<dir>/<file_id:06>.sst` and returns
    /// its final path.
    ///
    /// # Precondition
    ///
    /// Keys must be strictly increasing. A violation fails the build before
    /// any file is created: lookup correctness hinges on the data section
    /// being sorted, so the builder refuses rather than trusting the caller.
    ///
    /// # File Layout
    ///
    /// ```text
    /// [HEADER] magic(u32) | version(u32)
    /// [DATA]   repeated: klen(u32) | kind(u8) | vlen(u32) | key | value
    /// [INDEX]  repeated: klen(u32) | key | offset(u64)     (every 64th entry)
    /// [FOOTER] index_offset(u64) | index_count(u32) | magic(u32) | version(u32)
    /// ```
    ///
    /// # Crash Safety
    ///
    /// Writes to `tmp_<file_id:06>.sst`, fsyncs the file and the directory,
    /// renames, then fsyncs the directory again. The rename is the
    /// linearization point: either the final name exists complete, or it does
    /// not. A crash before the rename leaves a temp file that the engine
    /// removes at its next open.
    pub fn build(dir: &Path, file_id: u64, entries: &[(Vec<u8>, MemValue)]) -> Result<PathBuf> {
        for pair in entries.windows(2) {
            if pair[0].0 >= pair[1].0 {
                bail!("sstable build requires strictly increasing keys");
            }
        }

        fs::create_dir_all(dir)?;
        let tmp = temp_path(dir, file_id);
        let fin = table_path(dir, file_id);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;

        write_header(&mut file)?;

        // In-memory sparse index: (key, absolute offset) per 64th entry.
        let mut index: Vec<(Vec<u8>, u64)> =
            Vec::with_capacity(entries.len() / INDEX_INTERVAL + 1);

        for (i, (key, value)) in entries.iter().enumerate() {
            if i % INDEX_INTERVAL == 0 {
                index.push((key.clone(), file.stream_position()?));
            }

            let val = value.value(); // empty for a tombstone
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_u8(value.kind())?;
            file.write_u32::<LittleEndian>(val.len() as u32)?;
            file.write_all(key)?;
            file.write_all(val)?;
        }

        let index_offset = file.stream_position()?;
        for (key, offset) in &index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*offset)?;
        }

        write_footer(&mut file, index_offset, index.len() as u32)?;

        // Durability protocol: file contents, then the directory entry for
        // the temp name, then the rename, then the directory entry again.
        file.sync_all()?;
        drop(file);
        sync_dir(dir)?;
        fs::rename(&tmp, &fin)?;
        sync_dir(dir)?;

        Ok(fin)
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
