//! Rendering of timestamps into log lines.

use std::sync::{Arc, OnceLock};

use time::format_description::OwnedFormatItem;
use time::{OffsetDateTime, UtcOffset};

use crate::core::Timestamp;

/// Turns a timestamp into text attached to its log line.
pub trait TimestampFormat: Send + Sync {
    fn render(&self, timestamp: &Timestamp) -> String;

    /// Prefix `line` with the rendered timestamp.
    fn markup(&self, line: &mut String, timestamp: &Timestamp) {
        let rendered = self.render(timestamp);
        line.insert_str(0, &rendered);
    }
}

/// Wall-clock time, `[12:34:56] ` by default.
pub struct SystemTimeFormat {
    items: OwnedFormatItem,
    offset: UtcOffset,
}

impl SystemTimeFormat {
    /// Build from a `time` format description such as
    /// `"[year]-[month]-[day] [hour]:[minute]"`.
    ///
    /// # Errors
    ///
    /// Returns the parse error when `pattern` is not a valid description.
    pub fn new(
        pattern: &str,
        offset: UtcOffset,
    ) -> std::result::Result<Self, time::error::InvalidFormatDescription> {
        let items = time::format_description::parse_owned::<1>(pattern)?;
        Ok(Self { items, offset })
    }
}

impl Default for SystemTimeFormat {
    fn default() -> Self {
        Self {
            items: OwnedFormatItem::from(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            )),
            offset: UtcOffset::UTC,
        }
    }
}

impl TimestampFormat for SystemTimeFormat {
    fn render(&self, timestamp: &Timestamp) -> String {
        let nanos = i128::from(timestamp.epoch_millis) * 1_000_000;
        let formatted = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|dt| dt.to_offset(self.offset).format(&self.items).ok());
        match formatted {
            Some(text) => format!("[{text}] "),
            None => format!("[{}] ", timestamp.epoch_millis),
        }
    }
}

/// Time since the run started, `[01:02:03.456] `.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElapsedTimeFormat;

impl TimestampFormat for ElapsedTimeFormat {
    fn render(&self, timestamp: &Timestamp) -> String {
        let millis = timestamp.elapsed_millis;
        let hours = millis / 3_600_000;
        let minutes = millis / 60_000 % 60;
        let seconds = millis / 1_000 % 60;
        format!("[{hours:02}:{minutes:02}:{seconds:02}.{:03}] ", millis % 1_000)
    }
}

/// Hands out the format a session renders with.
pub trait FormatProvider: Send + Sync {
    fn format(&self) -> Arc<dyn TimestampFormat>;
}

/// Process-wide default: UTC wall-clock time, built on first use.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFormatProvider;

impl FormatProvider for DefaultFormatProvider {
    fn format(&self) -> Arc<dyn TimestampFormat> {
        static DEFAULT: OnceLock<Arc<dyn TimestampFormat>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(SystemTimeFormat::default())))
    }
}

/// Always hands out the same format.
pub struct FixedFormatProvider(Arc<dyn TimestampFormat>);

impl FixedFormatProvider {
    pub fn new(format: impl TimestampFormat + 'static) -> Self {
        Self(Arc::new(format))
    }
}

impl FormatProvider for FixedFormatProvider {
    fn format(&self) -> Arc<dyn TimestampFormat> {
        Arc::clone(&self.0)
    }
}
