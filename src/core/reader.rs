use crate::core::mmap::MmapFile;
use crate::core::record::{self, Cursor, Timestamp};
use crate::core::store::{
    load_checkpoint_index, validate_store_header, CheckpointIndex, StoreLocation, STORE_HEADER_LEN,
};
use crate::core::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct ReaderConfig {
    /// Consult `timestamps.idx` to shorten skips and record counts.
    pub use_checkpoints: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            use_checkpoints: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// The cursor points at the next record to decode (or at the end of the
    /// store, which is only discovered by the next read).
    Positioned,
    /// End of store reached, or the store failed to decode. Terminal.
    Exhausted,
}

/// Forward-only cursor over the records of one timestamp store.
///
/// The data file and its checkpoint index are loaded once at open; records
/// appended afterwards are not seen by this reader. Reaching the end is
/// reported as `None`, never as a wait for more records.
pub struct TimestampStoreReader {
    location: StoreLocation,
    data: MmapFile,
    records_start: u64,
    cursor: Cursor,
    state: ReaderState,
    checkpoints: Option<CheckpointIndex>,
}

impl TimestampStoreReader {
    /// # Errors
    ///
    /// - `Error::StoreUnavailable`: the data file cannot be opened
    /// - `Error::CorruptStore`: the data file header is invalid
    pub fn open(location: &StoreLocation) -> Result<Self> {
        Self::open_with_config(location, ReaderConfig::default())
    }

    /// # Errors
    ///
    /// - `Error::StoreUnavailable`: the data file cannot be opened
    /// - `Error::CorruptStore`: the data file header is invalid
    pub fn open_with_config(location: &StoreLocation, config: ReaderConfig) -> Result<Self> {
        let path = location.data_path();
        let data = match MmapFile::open(&path) {
            Ok(data) => data,
            Err(Error::Io(source)) => return Err(Error::StoreUnavailable { path, source }),
            Err(err) => return Err(err),
        };
        // A file without a complete header is a store nobody has flushed yet.
        let records_start = if validate_store_header(data.as_slice())? {
            u64::from(STORE_HEADER_LEN)
        } else {
            data.len() as u64
        };
        let checkpoints = if config.use_checkpoints {
            load_checkpoints(location)
        } else {
            None
        };
        log::debug!(
            "opened timestamp store {} ({} bytes)",
            location.dir().display(),
            data.len()
        );

        Ok(Self {
            location: location.clone(),
            data,
            records_start,
            cursor: Cursor::start(records_start),
            state: ReaderState::Positioned,
            checkpoints,
        })
    }

    /// Reopen a store at a cursor captured from an earlier reader.
    ///
    /// # Errors
    ///
    /// - `Error::StoreUnavailable`: the data file cannot be opened
    /// - `Error::CorruptStore`: invalid header, or the cursor lies outside the data file
    pub fn open_at(location: &StoreLocation, cursor: Cursor, config: ReaderConfig) -> Result<Self> {
        let mut reader = Self::open_with_config(location, config)?;
        if cursor.offset < reader.records_start || cursor.offset > reader.data.len() as u64 {
            return Err(Error::CorruptStore("cursor lies outside the store"));
        }
        reader.cursor = cursor;
        Ok(reader)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Index of the record the next `read` returns.
    pub fn line(&self) -> u64 {
        self.cursor.line
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ReaderState::Exhausted
    }

    /// Read the next timestamp.
    ///
    /// Returns `None` at the end of the store and on every call after that.
    ///
    /// # Errors
    ///
    /// - `Error::CorruptRecord`: the next record does not decode; the reader
    ///   is exhausted afterwards
    pub fn read(&mut self) -> Result<Option<Timestamp>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        match record::decode_next(self.data.as_slice(), &mut self.cursor) {
            Ok(Some(timestamp)) => Ok(Some(timestamp)),
            Ok(None) => {
                self.state = ReaderState::Exhausted;
                Ok(None)
            }
            Err(err) => {
                self.state = ReaderState::Exhausted;
                Err(err)
            }
        }
    }

    /// Advance past `n` records without returning them.
    ///
    /// Decodes every skipped record, starting from the nearest checkpoint when
    /// an index is available.
    ///
    /// # Errors
    ///
    /// - `Error::EndOfStore`: fewer than `n` records remain; the cursor is left
    ///   at the end of the store and the reader is exhausted
    /// - `Error::CorruptRecord`: a skipped record does not decode
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if self.is_exhausted() {
            return Err(Error::EndOfStore {
                records: self.cursor.line,
            });
        }
        let target = self.cursor.line.saturating_add(n);
        self.jump_to_checkpoint(target);

        while self.cursor.line < target {
            match record::decode_next(self.data.as_slice(), &mut self.cursor) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.state = ReaderState::Exhausted;
                    return Err(Error::EndOfStore {
                        records: self.cursor.line,
                    });
                }
                Err(err) => {
                    self.state = ReaderState::Exhausted;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Total number of records in the store. Does not move the cursor.
    ///
    /// # Errors
    ///
    /// - `Error::CorruptRecord`: a record between the last checkpoint and the
    ///   end of the store does not decode
    pub fn record_count(&self) -> Result<u64> {
        let mut cursor = self.cursor;
        if let Some(checkpoint) = self.checkpoint_floor(u64::MAX) {
            if checkpoint.line > cursor.line {
                cursor = checkpoint;
            }
        }
        let data = self.data.as_slice();
        while record::decode_next(data, &mut cursor)?.is_some() {}
        Ok(cursor.line)
    }

    /// Translate an end-relative line number into an absolute one.
    ///
    /// `-m` means "m lines before the end". Non-negative numbers are returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - `Error::OutOfRange`: `m` exceeds the number of records
    /// - `Error::CorruptRecord`: the store cannot be counted
    pub fn resolve_from_end_strict(&mut self, line_number: i64) -> Result<u64> {
        if line_number >= 0 {
            return Ok(line_number.unsigned_abs());
        }
        let records = self.record_count()?;
        records
            .checked_sub(line_number.unsigned_abs())
            .ok_or(Error::OutOfRange {
                requested: line_number,
                records,
            })
    }

    /// Like [`resolve_from_end_strict`](Self::resolve_from_end_strict), but a
    /// request reaching before the first record resolves to line 0.
    ///
    /// # Errors
    ///
    /// - `Error::CorruptRecord`: the store cannot be counted
    pub fn resolve_from_end(&mut self, line_number: i64) -> Result<u64> {
        match self.resolve_from_end_strict(line_number) {
            Err(Error::OutOfRange { requested, records }) => {
                log::debug!("line {requested} reaches before the first of {records} records, using line 0");
                Ok(0)
            }
            other => other,
        }
    }

    /// Release the mapping and file handle.
    pub fn close(self) {
        log::debug!(
            "closing timestamp store {} at line {}",
            self.location.dir().display(),
            self.cursor.line
        );
    }

    fn jump_to_checkpoint(&mut self, target: u64) {
        if let Some(checkpoint) = self.checkpoint_floor(target) {
            if checkpoint.line > self.cursor.line {
                self.cursor = checkpoint;
            }
        }
    }

    fn checkpoint_floor(&self, line: u64) -> Option<Cursor> {
        let data_len = self.data.len() as u64;
        let records_start = self.records_start;
        self.checkpoints
            .as_ref()?
            .floor(line, data_len)
            .filter(|checkpoint| checkpoint.offset >= records_start)
            .map(|checkpoint| Cursor {
                line: checkpoint.line,
                offset: checkpoint.offset,
                elapsed_millis: checkpoint.elapsed_millis,
                epoch_millis: checkpoint.epoch_millis,
            })
    }
}

fn load_checkpoints(location: &StoreLocation) -> Option<CheckpointIndex> {
    let path = location.index_path();
    match load_checkpoint_index(&path) {
        Ok(index) => index,
        Err(err) => {
            log::debug!("ignoring checkpoint index {}: {err}", path.display());
            None
        }
    }
}
