use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("timestamp store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record at line {line} (byte {offset}): {reason}")]
    CorruptRecord {
        line: u64,
        offset: u64,
        reason: &'static str,
    },
    #[error("corrupt store: {0}")]
    CorruptStore(&'static str),
    #[error("end of store after {records} records")]
    EndOfStore { records: u64 },
    #[error("line {requested} is out of range for a store of {records} records")]
    OutOfRange { requested: i64, records: u64 },
    #[error("elapsed time regressed from {previous}ms to {next}ms")]
    ElapsedRegressed { previous: u64, next: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// End of store is the normal way a pass runs out of timestamps.
    pub fn is_end_of_store(&self) -> bool {
        matches!(self, Error::EndOfStore { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
