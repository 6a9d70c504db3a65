//! # WAL — write-ahead log
//!
//! Append-only on-disk log of mutations for the ShoalKV storage engine.
//!
//! Every `put` and `del` is appended here before it touches the memtable, so
//! a crash loses at most the unsynced tail of the log. On startup the engine
//! replays the log to reconstruct the memtable, then truncates it back to the
//! bare header after each successful flush.
//!
//! ## File layout
//!
//! ```text
//! [magic: u32 LE = "KVWL"][version: u32 LE = 1]          8-byte header
//! [klen: u32][key][kind: u8][vlen: u32][value][crc: u32]  repeated records
//! ```
//!
//! The CRC32 (IEEE, zlib-compatible) covers `klen | key | kind | vlen | value`,
//! exactly the record bytes preceding it. A `Del` record writes `vlen = 0`
//! and no value bytes.
//!
//! Replay is tail tolerant: a record cut short by a crash mid-append ends
//! replay cleanly rather than failing it. A record whose checksum does not
//! match is skipped with a warning and replay continues.

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{KIND_DEL, KIND_PUT};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Magic number identifying WAL files (ASCII "KVWL").
pub const WAL_MAGIC: u32 = 0x4B56_574C;
/// Current WAL format version.
pub const WAL_VERSION: u32 = 1;
/// Size of the file header: magic + version.
pub const HEADER_BYTES: u64 = 8;

/// One logical mutation recovered from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad wal header")]
    BadHeader,
}

/// Append-side handle to the log.
///
/// Holds the write file descriptor open for the lifetime of the engine;
/// [`replay`](Wal::replay) opens its own short-lived read-only handle so the
/// writer never has to seek away from the end.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    /// Opens the log at `path`, creating it (and its parent directory) on
    /// first use.
    ///
    /// An empty file gets the 8-byte header written; a non-empty file must
    /// start with a valid header or opening fails with
    /// [`WalError::BadHeader`]. The writer is left positioned at end-of-file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            file.write_u32::<LittleEndian>(WAL_MAGIC)?;
            file.write_u32::<LittleEndian>(WAL_VERSION)?;
        } else {
            file.seek(SeekFrom::Start(0))?;
            let mut header = [0u8; HEADER_BYTES as usize];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(WalError::BadHeader)
                }
                Err(e) => return Err(WalError::Io(e)),
            }
            let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
            if magic != WAL_MAGIC || version != WAL_VERSION {
                return Err(WalError::BadHeader);
            }
            file.seek(SeekFrom::End(0))?;
        }

        Ok(Self { path, file })
    }

    /// Appends a live-value record.
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        self.append_record(key, KIND_PUT, value)
    }

    /// Appends a tombstone record. Its encoded value length is zero.
    pub fn append_del(&mut self, key: &[u8]) -> Result<(), WalError> {
        self.append_record(key, KIND_DEL, &[])
    }

    // The whole framed record goes to the kernel in one write_all call, so a
    // record is never interleaved at the byte level.
    fn append_record(&mut self, key: &[u8], kind: u8, value: &[u8]) -> Result<(), WalError> {
        let mut buf = Vec::with_capacity(4 + key.len() + 1 + 4 + value.len() + 4);
        buf.write_u32::<LittleEndian>(key.len() as u32)?;
        buf.extend_from_slice(key);
        buf.write_u8(kind)?;
        buf.write_u32::<LittleEndian>(value.len() as u32)?;
        buf.extend_from_slice(value);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        let crc = hasher.finalize();
        buf.write_u32::<LittleEndian>(crc)?;

        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Forces everything appended so far onto stable storage.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncates the log back to the bare header.
    ///
    /// Called after a successful flush: the flushed SSTable now carries the
    /// state the log was protecting. Post-condition: file size equals 8 and
    /// the writer sits at end-of-header.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<LittleEndian>(WAL_MAGIC)?;
        self.file.write_u32::<LittleEndian>(WAL_VERSION)?;
        Ok(())
    }

    /// Replays all intact records from the start of the log, invoking `apply`
    /// for each in append order.
    ///
    /// Opens a fresh read-only handle, so the append position is untouched.
    /// A bad header is a hard error. A record cut short anywhere (torn
    /// append, missing checksum) ends replay cleanly with `Ok`. A checksum
    /// mismatch skips that record and continues. An unknown kind byte ends
    /// replay: past it the framing can no longer be trusted.
    pub fn replay<F>(&self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut rdr = BufReader::new(File::open(&self.path)?);

        let mut header = [0u8; HEADER_BYTES as usize];
        match rdr.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(WalError::BadHeader)
            }
            Err(e) => return Err(WalError::Io(e)),
        }
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if magic != WAL_MAGIC || version != WAL_VERSION {
            return Err(WalError::BadHeader);
        }

        loop {
            let mut klen_buf = [0u8; 4];
            if !read_or_eof(&mut rdr, &mut klen_buf)? {
                return Ok(()); // clean EOF at a record boundary, or torn length
            }
            let klen = u32::from_le_bytes(klen_buf);

            let mut key = vec![0u8; klen as usize];
            if !read_or_eof(&mut rdr, &mut key)? {
                return Ok(());
            }

            let mut kind_buf = [0u8; 1];
            if !read_or_eof(&mut rdr, &mut kind_buf)? {
                return Ok(());
            }
            let kind = kind_buf[0];

            let mut vlen_buf = [0u8; 4];
            if !read_or_eof(&mut rdr, &mut vlen_buf)? {
                return Ok(());
            }
            let vlen = u32::from_le_bytes(vlen_buf);

            // Only a Put carries value bytes. A non-Put record with a nonzero
            // vlen can only come from corruption; its bytes are consumed so
            // the checksum field still lines up, and the checksum then
            // decides its fate.
            let mut value = Vec::new();
            if kind == KIND_PUT {
                value = vec![0u8; vlen as usize];
                if !read_or_eof(&mut rdr, &mut value)? {
                    return Ok(());
                }
            } else if vlen > 0 {
                let mut skipped = vec![0u8; vlen as usize];
                if !read_or_eof(&mut rdr, &mut skipped)? {
                    return Ok(());
                }
            }

            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut rdr, &mut crc_buf)? {
                return Ok(());
            }
            let crc_stored = u32::from_le_bytes(crc_buf);

            // The checksum covers exactly the record bytes written before it:
            // klen | key | kind | vlen | value (no value bytes for a Del).
            let mut hasher = Crc32::new();
            hasher.update(&klen_buf);
            hasher.update(&key);
            hasher.update(&kind_buf);
            hasher.update(&vlen_buf);
            if kind == KIND_PUT {
                hasher.update(&value);
            }
            if hasher.finalize() != crc_stored {
                warn!("wal: checksum mismatch, skipping corrupt record");
                continue;
            }

            match kind {
                KIND_PUT => apply(WalRecord::Put { key, value }),
                KIND_DEL => apply(WalRecord::Del { key }),
                other => {
                    warn!(kind = other, "wal: unknown record kind, ending replay");
                    return Ok(());
                }
            }
        }
    }

    /// Path of the log file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Reads exactly buf.len() bytes; Ok(false) means EOF hit mid-read (a
// truncated tail, not an error).
fn read_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(WalError::Io(e)),
    }
}
