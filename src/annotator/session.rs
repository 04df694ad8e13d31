//! Per-render-pass driver attaching timestamps to log lines.
//!
//! # Lifecycle
//!
//! ```text
//! Unpositioned ──first annotate──▶ Streaming(reader) ──read None / error──▶ Closed
//!       │                            │      ▲
//!       │                       suspend   resume + annotate
//!       │                            ▼      │
//!       └──────end of file──────▶ Closed   Positioned { cursor }
//! ```
//!
//! The first call asks the log positioner where the pass starts, resolves an
//! end-relative line with a throwaway reader, then opens the main reader and
//! skips to that line. Every later call is one sequential read. A session can
//! be turned into a plain [`SessionState`] between calls and resumed without
//! repeating the positioning step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotator::format::{FormatProvider, TimestampFormat};
use crate::annotator::position::LogPositioner;
use crate::core::{
    Cursor, Error, ReaderConfig, Result, StoreLocation, Timestamp, TimestampStoreReader,
};

/// Whether the caller should keep annotating lines in this pass.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Checkpointable state of an [`AnnotationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No line has been annotated yet.
    Unpositioned,
    /// The next line gets the record at `cursor`.
    Positioned { cursor: Cursor },
    /// Annotation has stopped for this pass.
    Closed,
}

enum Stage {
    Unpositioned,
    Suspended(Cursor),
    Streaming(TimestampStoreReader),
    Closed,
}

pub struct AnnotationSession<P> {
    positioner: P,
    location: StoreLocation,
    config: ReaderConfig,
    formats: Arc<dyn FormatProvider>,
    format: Option<Arc<dyn TimestampFormat>>,
    stage: Stage,
}

impl<P: LogPositioner> AnnotationSession<P> {
    pub fn new(positioner: P, location: StoreLocation, formats: Arc<dyn FormatProvider>) -> Self {
        Self::with_config(positioner, location, formats, ReaderConfig::default())
    }

    pub fn with_config(
        positioner: P,
        location: StoreLocation,
        formats: Arc<dyn FormatProvider>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            positioner,
            location,
            config,
            formats,
            format: None,
            stage: Stage::Unpositioned,
        }
    }

    /// Rebuild a session from [`state`](Self::state) or [`suspend`](Self::suspend).
    ///
    /// A positioned session reopens its store on the next call to
    /// [`annotate`](Self::annotate), directly at the saved cursor.
    pub fn resume(
        positioner: P,
        location: StoreLocation,
        formats: Arc<dyn FormatProvider>,
        state: SessionState,
    ) -> Self {
        Self::resume_with_config(positioner, location, formats, ReaderConfig::default(), state)
    }

    pub fn resume_with_config(
        positioner: P,
        location: StoreLocation,
        formats: Arc<dyn FormatProvider>,
        config: ReaderConfig,
        state: SessionState,
    ) -> Self {
        let mut session = Self::with_config(positioner, location, formats, config);
        session.stage = match state {
            SessionState::Unpositioned => Stage::Unpositioned,
            SessionState::Positioned { cursor } => Stage::Suspended(cursor),
            SessionState::Closed => Stage::Closed,
        };
        session
    }

    /// Attach the timestamp of the next log line to `line`.
    ///
    /// Store failures never escape: they are logged and end annotation for
    /// the rest of the pass. After `Flow::Stop` every call returns
    /// `Flow::Stop` without touching the store.
    pub fn annotate(&mut self, line: &mut String) -> Flow {
        let outcome = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Closed => return Flow::Stop,
            Stage::Unpositioned => self.position(line),
            Stage::Suspended(cursor) => {
                match TimestampStoreReader::open_at(&self.location, cursor, self.config) {
                    Ok(reader) => self.advance(reader, line),
                    Err(err) => Err(err),
                }
            }
            Stage::Streaming(reader) => self.advance(reader, line),
        };

        match outcome {
            Ok(Some(reader)) => {
                self.stage = Stage::Streaming(reader);
                Flow::Continue
            }
            Ok(None) => Flow::Stop,
            Err(err) => {
                self.report(&err);
                Flow::Stop
            }
        }
    }

    /// Snapshot of the session as plain data.
    pub fn state(&self) -> SessionState {
        match &self.stage {
            Stage::Unpositioned => SessionState::Unpositioned,
            Stage::Suspended(cursor) => SessionState::Positioned { cursor: *cursor },
            Stage::Streaming(reader) if reader.is_exhausted() => SessionState::Closed,
            Stage::Streaming(reader) => SessionState::Positioned {
                cursor: reader.cursor(),
            },
            Stage::Closed => SessionState::Closed,
        }
    }

    /// Release the store and return the state needed to resume.
    pub fn suspend(self) -> SessionState {
        let state = self.state();
        self.close();
        state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.stage, Stage::Closed)
    }

    pub fn close(self) {
        if let Stage::Streaming(reader) = self.stage {
            reader.close();
        }
    }

    fn position(&mut self, line: &mut String) -> Result<Option<TimestampStoreReader>> {
        let position = self.positioner.seek()?;
        if position.end_of_file {
            log::debug!("render pass starts past the end of the log, not annotating");
            return Ok(None);
        }

        let start_line = if position.line_number < 0 {
            let mut resolver = TimestampStoreReader::open_with_config(&self.location, self.config)?;
            let resolved = resolver.resolve_from_end(position.line_number);
            resolver.close();
            resolved?
        } else {
            position.line_number.unsigned_abs()
        };

        let mut reader = TimestampStoreReader::open_with_config(&self.location, self.config)?;
        reader.skip(start_line)?;
        let first = reader.read()?;
        if position.at_line_start {
            if let Some(timestamp) = first {
                self.markup(line, &timestamp);
            }
        }
        Ok(Some(reader))
    }

    fn advance(
        &mut self,
        mut reader: TimestampStoreReader,
        line: &mut String,
    ) -> Result<Option<TimestampStoreReader>> {
        match reader.read()? {
            Some(timestamp) => {
                self.markup(line, &timestamp);
                Ok(Some(reader))
            }
            None => {
                reader.close();
                Ok(None)
            }
        }
    }

    fn markup(&mut self, line: &mut String, timestamp: &Timestamp) {
        let formats = &self.formats;
        let format = self.format.get_or_insert_with(|| formats.format());
        format.markup(line, timestamp);
    }

    fn report(&self, err: &Error) {
        if err.is_end_of_store() {
            log::debug!(
                "timestamps for {} ran out: {err}",
                self.location.dir().display()
            );
        } else {
            log::warn!(
                "error reading timestamps for {}: {err}",
                self.location.dir().display()
            );
        }
    }
}
