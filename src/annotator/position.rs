//! Where in the log a render pass starts.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::core::Result;

const SCAN_CHUNK: usize = 64 * 1024;

/// Start of a render pass, expressed in log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogPosition {
    /// Nothing at or after this point will be annotated in this pass.
    pub end_of_file: bool,
    /// Line containing the start of the pass. Negative values count back from
    /// the end of the log: -1 is the last line.
    pub line_number: i64,
    /// The pass starts at the beginning of `line_number`, not in its middle.
    pub at_line_start: bool,
}

impl LogPosition {
    pub const fn at_line(line_number: i64) -> Self {
        Self {
            end_of_file: false,
            line_number,
            at_line_start: true,
        }
    }

    pub const fn end_of_file() -> Self {
        Self {
            end_of_file: true,
            line_number: 0,
            at_line_start: false,
        }
    }
}

/// Locates the first line of a render pass. Called at most once per pass.
pub trait LogPositioner {
    /// # Errors
    ///
    /// Any error stops annotation for the pass.
    fn seek(&mut self) -> Result<LogPosition>;
}

impl LogPositioner for LogPosition {
    fn seek(&mut self) -> Result<LogPosition> {
        Ok(*self)
    }
}

/// Resolves a byte offset into a plain-text log file.
///
/// A negative offset counts bytes back from the end of the file and yields a
/// negative line number, so the line can be matched against the timestamp
/// store without counting every line of a large log.
#[derive(Clone, Debug)]
pub struct ConsoleLogPositioner {
    path: PathBuf,
    offset: i64,
}

impl ConsoleLogPositioner {
    pub fn new(path: impl Into<PathBuf>, offset: i64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

impl LogPositioner for ConsoleLogPositioner {
    fn seek(&mut self) -> Result<LogPosition> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        if self.offset < 0 {
            let start = i128::from(len) + i128::from(self.offset);
            if start > 0 {
                let start = start as u64;
                let at_line_start = byte_at(&mut file, start - 1)? == Some(b'\n');
                let scan = scan_lines(&mut file, start, len)?;
                let mut lines = scan.newlines;
                if scan.last != Some(b'\n') {
                    // final line without a trailing newline
                    lines += 1;
                }
                return Ok(LogPosition {
                    end_of_file: false,
                    line_number: -i64::try_from(lines).unwrap_or(i64::MAX),
                    at_line_start,
                });
            }
        }

        let pos = self.offset.max(0).unsigned_abs();
        let scan = scan_lines(&mut file, 0, pos.min(len))?;
        Ok(LogPosition {
            end_of_file: pos >= len,
            line_number: i64::try_from(scan.newlines).unwrap_or(i64::MAX),
            at_line_start: pos == 0 || scan.last == Some(b'\n'),
        })
    }
}

struct LineScan {
    newlines: u64,
    last: Option<u8>,
}

fn scan_lines(file: &mut File, from: u64, to: u64) -> Result<LineScan> {
    file.seek(SeekFrom::Start(from))?;
    let mut reader = BufReader::new(file.take(to.saturating_sub(from)));
    let mut buf = vec![0u8; SCAN_CHUNK];
    let mut scan = LineScan {
        newlines: 0,
        last: None,
    };
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            return Ok(scan);
        }
        let chunk = &buf[..read];
        scan.newlines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        scan.last = chunk.last().copied();
    }
}

fn byte_at(file: &mut File, pos: u64) -> Result<Option<u8>> {
    file.seek(SeekFrom::Start(pos))?;
    let mut byte = [0u8; 1];
    match file.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}
