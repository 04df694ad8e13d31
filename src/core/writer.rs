//! Companion writer producing a timestamp store while a run is logging.
//!
//! The writer appends one record per emitted line and, every
//! `checkpoint_stride` records, remembers the decode state at that record so
//! readers can skip without decoding from the first line. The checkpoint
//! index is rewritten on each flush.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::core::clock::{RunClock, SystemRunClock};
use crate::core::record::{self, Timestamp};
use crate::core::store::{
    encode_store_header, write_checkpoint_index, Checkpoint, StoreLocation, STORE_HEADER_LEN,
};
use crate::core::{Error, Result};

pub const DEFAULT_CHECKPOINT_STRIDE: u32 = 4096;

#[derive(Clone, Copy, Debug)]
pub struct WriterConfig {
    /// Records between checkpoints; 0 disables the checkpoint index.
    pub checkpoint_stride: u32,
    /// fsync the data file on every flush, not only on `finish`.
    pub sync_on_flush: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            checkpoint_stride: DEFAULT_CHECKPOINT_STRIDE,
            sync_on_flush: false,
        }
    }
}

pub struct TimestampStoreWriter {
    location: StoreLocation,
    file: BufWriter<File>,
    config: WriterConfig,
    clock: Box<dyn RunClock>,
    previous: Option<Timestamp>,
    records: u64,
    write_offset: u64,
    checkpoints: Vec<Checkpoint>,
    checkpoints_dirty: bool,
    scratch: Vec<u8>,
}

impl TimestampStoreWriter {
    /// Create a fresh store, replacing any existing one at `location`.
    ///
    /// Readers already open on the old store keep reading it until closed.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: failed to create the directory or data file
    pub fn create(location: &StoreLocation, config: WriterConfig) -> Result<Self> {
        Self::create_with_clock(location, config, SystemRunClock::new())
    }

    /// # Errors
    ///
    /// - `Error::Io`: failed to create the directory or data file
    pub fn create_with_clock(
        location: &StoreLocation,
        config: WriterConfig,
        clock: impl RunClock,
    ) -> Result<Self> {
        std::fs::create_dir_all(location.dir())?;
        match std::fs::remove_file(location.index_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Io(err)),
        }
        // Readers map the data file, so an existing store is replaced by
        // rename rather than truncated: open mappings keep the old inode.
        let data_path = location.data_path();
        let staging = data_path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;
        let mut file = BufWriter::new(file);
        file.write_all(&encode_store_header())?;
        file.flush()?;
        std::fs::rename(&staging, &data_path)?;
        log::debug!("created timestamp store {}", location.dir().display());

        Ok(Self {
            location: location.clone(),
            file,
            config,
            clock: Box::new(clock),
            previous: None,
            records: 0,
            write_offset: u64::from(STORE_HEADER_LEN),
            checkpoints: Vec::new(),
            checkpoints_dirty: false,
            scratch: Vec::with_capacity(32),
        })
    }

    /// Number of records appended so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Byte length of the data file once buffered records are flushed.
    pub fn data_len(&self) -> u64 {
        self.write_offset
    }

    pub fn data_path(&self) -> PathBuf {
        self.location.data_path()
    }

    /// Append the timestamp of the next log line.
    ///
    /// # Errors
    ///
    /// - `Error::ElapsedRegressed`: elapsed time is earlier than the previous line's
    /// - `Error::Io`: failed to write the record
    pub fn append(&mut self, timestamp: Timestamp) -> Result<()> {
        self.scratch.clear();
        record::encode(&timestamp, self.previous.as_ref(), &mut self.scratch)?;

        let stride = u64::from(self.config.checkpoint_stride);
        if stride > 0 && self.records > 0 && self.records % stride == 0 {
            if let Some(previous) = self.previous {
                self.checkpoints.push(Checkpoint {
                    line: self.records,
                    offset: self.write_offset,
                    elapsed_millis: previous.elapsed_millis,
                    epoch_millis: previous.epoch_millis,
                });
                self.checkpoints_dirty = true;
            }
        }

        self.file.write_all(&self.scratch)?;
        self.write_offset += self.scratch.len() as u64;
        self.records += 1;
        self.previous = Some(timestamp);
        Ok(())
    }

    /// Append a record stamped with the writer's clock.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: failed to write the record
    pub fn append_now(&mut self) -> Result<Timestamp> {
        let timestamp = self.clock.now();
        self.append(timestamp)?;
        Ok(timestamp)
    }

    /// Make appended records visible to readers and refresh the checkpoint index.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: failed to flush data or rewrite the index
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        if self.config.sync_on_flush {
            self.file.get_ref().sync_data()?;
        }
        if self.checkpoints_dirty {
            write_checkpoint_index(
                &self.location.index_path(),
                self.config.checkpoint_stride,
                &self.checkpoints,
            )?;
            self.checkpoints_dirty = false;
        }
        Ok(())
    }

    /// Flush and sync the store.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: failed to flush or sync
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.file.get_ref().sync_all()?;
        log::debug!(
            "finished timestamp store {} with {} records",
            self.location.dir().display(),
            self.records
        );
        Ok(())
    }
}
