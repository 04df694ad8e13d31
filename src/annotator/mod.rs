//! Attaching stored timestamps to log lines during a render pass.

pub mod format;
pub mod position;
pub mod session;

pub use format::{
    DefaultFormatProvider, ElapsedTimeFormat, FixedFormatProvider, FormatProvider,
    SystemTimeFormat, TimestampFormat,
};
pub use position::{ConsoleLogPositioner, LogPosition, LogPositioner};
pub use session::{AnnotationSession, Flow, SessionState};
