//! SSTable binary format constants, naming, and header/footer helpers.
//!
//! The header is the **first 8 bytes** and the footer the **last 20 bytes**
//! of every table file:
//!
//! ```text
//! header: [magic: u32 LE = "KVST"][version: u32 LE = 1]
//! footer: [index_offset: u64 LE][index_count: u32 LE][magic: u32 LE][version: u32 LE]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic number identifying SSTable files (ASCII "KVST").
pub const SSTABLE_MAGIC: u32 = 0x4B56_5354;

/// Current SSTable format version.
pub const SSTABLE_VERSION: u32 = 1;

/// Size of the header in bytes: magic + version.
pub const HEADER_BYTES: u64 = 4 + 4;

/// Size of the footer in bytes: `index_offset` + `index_count` + magic +
/// version.
pub const FOOTER_BYTES: u64 = 8 + 4 + 4 + 4;

/// One sparse-index record is emitted per this many data entries (the 0th,
/// 64th, 128th, ... entries are indexed).
pub const INDEX_INTERVAL: usize = 64;

/// Final on-disk name for a table: `<dir>/<file_id:06>.sst`.
pub fn table_path(dir: &Path, file_id: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", file_id))
}

/// Name of the transient build file: `<dir>/tmp_<file_id:06>.sst`.
///
/// The stem never parses as an integer, so an orphan left by a crashed build
/// is invisible to table discovery.
pub fn temp_path(dir: &Path, file_id: u64) -> PathBuf {
    dir.join(format!("tmp_{:06}.sst", file_id))
}

/// Writes the 8-byte SSTable header to `w`.
pub fn write_header<W: Write>(w: &mut W) -> IoResult<()> {
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    w.write_u32::<LittleEndian>(SSTABLE_VERSION)?;
    Ok(())
}

/// Writes the SSTable footer to `w`.
pub fn write_footer<W: Write>(w: &mut W, index_offset: u64, index_count: u32) -> IoResult<()> {
    w.write_u64::<LittleEndian>(index_offset)?;
    w.write_u32::<LittleEndian>(index_count)?;
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    w.write_u32::<LittleEndian>(SSTABLE_VERSION)?;
    Ok(())
}

/// Reads the SSTable footer from the last 20 bytes of `r`, returning
/// `(index_offset, index_count, magic, version)` unvalidated.
///
/// After this call the cursor is at the end of the file.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<(u64, u32, u32, u32)> {
    let filesize = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(filesize.saturating_sub(FOOTER_BYTES)))?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    let index_count = r.read_u32::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    let version = r.read_u32::<LittleEndian>()?;
    Ok((index_offset, index_count, magic, version))
}
