//! On-disk layout of a timestamp store.
//!
//! ```text
//! {store_dir}/
//!   timestamps       ← 16-byte header followed by one record per log line
//!   timestamps.idx   ← optional checkpoint index, rewritten on every flush
//! ```

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

pub const DATA_FILE: &str = "timestamps";
pub const INDEX_FILE: &str = "timestamps.idx";

pub const STORE_MAGIC: [u8; 8] = *b"TSTAMP1\0";
pub const STORE_VERSION: u16 = 1;
pub const STORE_HEADER_LEN: u16 = 16;

pub(crate) const INDEX_MAGIC: [u8; 8] = *b"TSTIDX1\0";
pub(crate) const INDEX_VERSION: u16 = 1;
pub(crate) const INDEX_HEADER_LEN: u16 = 32;
const INDEX_ENTRY_LEN: usize = 32;

/// Where the timestamps of one run live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreLocation {
    dir: PathBuf,
}

impl StoreLocation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }
}

/// Turns a run reference into the location of its timestamp store.
pub trait StoreProvider {
    fn locate(&self, run: &str) -> StoreLocation;
}

/// Stores kept side by side under one root, one directory per run.
#[derive(Clone, Debug)]
pub struct DirectoryStoreProvider {
    root: PathBuf,
}

impl DirectoryStoreProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreProvider for DirectoryStoreProvider {
    fn locate(&self, run: &str) -> StoreLocation {
        StoreLocation::new(self.root.join(run))
    }
}

pub(crate) fn encode_store_header() -> [u8; STORE_HEADER_LEN as usize] {
    let mut buf = [0u8; STORE_HEADER_LEN as usize];
    buf[0..8].copy_from_slice(&STORE_MAGIC);
    buf[8..10].copy_from_slice(&STORE_VERSION.to_le_bytes());
    buf[10..12].copy_from_slice(&STORE_HEADER_LEN.to_le_bytes());
    buf
}

/// Check the data file header. Returns `false` when the file is too short to
/// hold one, which happens while a writer is still creating the store.
pub(crate) fn validate_store_header(data: &[u8]) -> Result<bool> {
    let Some(header) = data.get(..STORE_HEADER_LEN as usize) else {
        return Ok(false);
    };
    if header[0..8] != STORE_MAGIC {
        return Err(Error::CorruptStore("store magic mismatch"));
    }
    let version = u16::from_le_bytes([header[8], header[9]]);
    if version != STORE_VERSION {
        return Err(Error::CorruptStore("unsupported store version"));
    }
    let header_len = u16::from_le_bytes([header[10], header[11]]);
    if header_len != STORE_HEADER_LEN {
        return Err(Error::CorruptStore("unexpected store header length"));
    }
    Ok(true)
}

/// Decode state at the start of record `line`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    pub line: u64,
    pub offset: u64,
    pub elapsed_millis: u64,
    pub epoch_millis: i64,
}

pub(crate) struct CheckpointIndex {
    pub entries: Vec<Checkpoint>,
}

impl CheckpointIndex {
    /// Last checkpoint at or before `line` that lies inside `data_len` bytes.
    pub fn floor(&self, line: u64, data_len: u64) -> Option<&Checkpoint> {
        let idx = self.entries.partition_point(|entry| entry.line <= line);
        self.entries[..idx]
            .iter()
            .rev()
            .find(|entry| entry.offset <= data_len)
    }
}

pub(crate) fn write_checkpoint_index(path: &Path, stride: u32, entries: &[Checkpoint]) -> Result<()> {
    let mut body = Vec::with_capacity(entries.len() * INDEX_ENTRY_LEN);
    for entry in entries {
        body.extend_from_slice(&entry.line.to_le_bytes());
        body.extend_from_slice(&entry.offset.to_le_bytes());
        body.extend_from_slice(&entry.elapsed_millis.to_le_bytes());
        body.extend_from_slice(&entry.epoch_millis.to_le_bytes());
    }

    let mut header = [0u8; INDEX_HEADER_LEN as usize];
    header[0..8].copy_from_slice(&INDEX_MAGIC);
    header[8..10].copy_from_slice(&INDEX_VERSION.to_le_bytes());
    header[10..12].copy_from_slice(&INDEX_HEADER_LEN.to_le_bytes());
    header[12..16].copy_from_slice(&stride.to_le_bytes());
    header[16..24].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    header[24..28].copy_from_slice(&crc32fast::hash(&body).to_le_bytes());

    let tmp = path.with_extension("idx.tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&header)?;
    file.write_all(&body)?;
    file.sync_all()?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Load the checkpoint index, `Ok(None)` when there is none.
pub(crate) fn load_checkpoint_index(path: &Path) -> Result<Option<CheckpointIndex>> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err)),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    decode_checkpoint_index(&bytes).map(Some)
}

fn decode_checkpoint_index(bytes: &[u8]) -> Result<CheckpointIndex> {
    let header = bytes
        .get(..INDEX_HEADER_LEN as usize)
        .ok_or(Error::CorruptStore("checkpoint index header truncated"))?;
    if header[0..8] != INDEX_MAGIC {
        return Err(Error::CorruptStore("checkpoint index magic mismatch"));
    }
    if u16::from_le_bytes([header[8], header[9]]) != INDEX_VERSION {
        return Err(Error::CorruptStore("unsupported checkpoint index version"));
    }
    let stride = u32::from_le_bytes(le_array(&header[12..16]));
    let count = u64::from_le_bytes(le_array(&header[16..24]));
    let crc = u32::from_le_bytes(le_array(&header[24..28]));

    let body = &bytes[INDEX_HEADER_LEN as usize..];
    let expected_len = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(INDEX_ENTRY_LEN))
        .ok_or(Error::CorruptStore("checkpoint index entry count overflow"))?;
    if body.len() != expected_len {
        return Err(Error::CorruptStore("checkpoint index length mismatch"));
    }
    if crc32fast::hash(body) != crc {
        return Err(Error::CorruptStore("checkpoint index crc mismatch"));
    }

    let entries = body
        .chunks_exact(INDEX_ENTRY_LEN)
        .map(|chunk| Checkpoint {
            line: u64::from_le_bytes(le_array(&chunk[0..8])),
            offset: u64::from_le_bytes(le_array(&chunk[8..16])),
            elapsed_millis: u64::from_le_bytes(le_array(&chunk[16..24])),
            epoch_millis: i64::from_le_bytes(le_array(&chunk[24..32])),
        })
        .collect::<Vec<_>>();
    if entries.windows(2).any(|pair| pair[0].line >= pair[1].line) {
        return Err(Error::CorruptStore("checkpoint index not sorted"));
    }
    // Entries sit at every stride-th line, starting at line `stride`.
    let on_stride = |entry: &Checkpoint| stride > 0 && entry.line % u64::from(stride) == 0;
    if !entries.iter().all(on_stride) {
        return Err(Error::CorruptStore("checkpoint index entry off stride"));
    }
    Ok(CheckpointIndex { entries })
}

fn le_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(slice);
    buf
}
