//! Per-line timestamps for append-only text logs.
//!
//! Timestamps live in a compact side store next to the log, one delta-coded
//! record per emitted line. [`core`] reads and writes that store;
//! [`annotator`] drives a render pass, attaching each line's timestamp as the
//! line is rendered, starting anywhere in the log.
//!
//! ```no_run
//! use std::sync::Arc;
//! use timestamper::annotator::{AnnotationSession, DefaultFormatProvider, Flow, LogPosition};
//! use timestamper::core::StoreLocation;
//!
//! let location = StoreLocation::new("./runs/42/timestamps");
//! let mut session = AnnotationSession::new(
//!     LogPosition::at_line(0),
//!     location,
//!     Arc::new(DefaultFormatProvider),
//! );
//! let mut annotating = true;
//! for text in ["fetching", "compiling", "done"] {
//!     let mut line = text.to_string();
//!     if annotating {
//!         annotating = session.annotate(&mut line) == Flow::Continue;
//!     }
//!     println!("{line}");
//! }
//! ```

pub mod annotator;
pub mod core;

pub use crate::annotator::{AnnotationSession, Flow, LogPosition, LogPositioner, SessionState};
pub use crate::core::{
    Error, Result, StoreLocation, Timestamp, TimestampStoreReader, TimestampStoreWriter,
};
