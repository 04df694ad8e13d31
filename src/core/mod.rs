//! Timestamp store: record codec, reader and companion writer.

pub mod clock;
pub mod error;
mod mmap;
pub mod reader;
pub mod record;
pub mod store;
pub mod writer;

pub use clock::{RunClock, SystemRunClock};
pub use error::{Error, Result};
pub use reader::{ReaderConfig, ReaderState, TimestampStoreReader};
pub use record::{Cursor, Timestamp};
pub use store::{DirectoryStoreProvider, StoreLocation, StoreProvider};
pub use writer::{TimestampStoreWriter, WriterConfig};
