//! Timestamp record codec.
//!
//! One record is written per log line. Records are delta coded against the
//! previous record, so a record can only be decoded with the running bases
//! carried in a [`Cursor`].
//!
//! ```text
//! 0x01 DELTA     varint(elapsed_delta) zigzag(epoch_delta - elapsed_delta)
//! 0x02 ABSOLUTE  elapsed_millis:u64le  epoch_millis:i64le
//! ```
//!
//! Both varints are capped at five bytes. The first record of a store is
//! always ABSOLUTE.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

pub const TAG_DELTA: u8 = 0x01;
pub const TAG_ABSOLUTE: u8 = 0x02;

const ABSOLUTE_BODY_LEN: usize = 16;
const MAX_VARINT32_LEN: usize = 5;

/// Time at which one log line was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the start of the run.
    pub elapsed_millis: u64,
    /// Milliseconds since the UNIX epoch.
    pub epoch_millis: i64,
}

impl Timestamp {
    pub const fn new(elapsed_millis: u64, epoch_millis: i64) -> Self {
        Self {
            elapsed_millis,
            epoch_millis,
        }
    }
}

/// Logical position in a store plus the bases needed to decode the next record.
///
/// `elapsed_millis` and `epoch_millis` hold the values of record `line - 1`
/// and are meaningless while `line == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u64,
    pub offset: u64,
    pub elapsed_millis: u64,
    pub epoch_millis: i64,
}

impl Cursor {
    /// Cursor positioned at the first record, which starts at `offset`.
    pub const fn start(offset: u64) -> Self {
        Self {
            line: 0,
            offset,
            elapsed_millis: 0,
            epoch_millis: 0,
        }
    }

    fn previous(&self) -> Option<Timestamp> {
        if self.line == 0 {
            None
        } else {
            Some(Timestamp::new(self.elapsed_millis, self.epoch_millis))
        }
    }

    fn corrupt(&self, reason: &'static str) -> Error {
        Error::CorruptRecord {
            line: self.line,
            offset: self.offset,
            reason,
        }
    }
}

/// Append the record for `timestamp` to `out`.
///
/// `previous` is the timestamp of the preceding line, `None` for the first
/// line of a store.
///
/// # Errors
///
/// - `Error::ElapsedRegressed`: `timestamp` is earlier than `previous` in run time
pub fn encode(timestamp: &Timestamp, previous: Option<&Timestamp>, out: &mut Vec<u8>) -> Result<()> {
    let Some(previous) = previous else {
        encode_absolute(timestamp, out);
        return Ok(());
    };
    if timestamp.elapsed_millis < previous.elapsed_millis {
        return Err(Error::ElapsedRegressed {
            previous: previous.elapsed_millis,
            next: timestamp.elapsed_millis,
        });
    }
    match delta_parts(timestamp, previous) {
        Some((elapsed_delta, skew)) => {
            out.push(TAG_DELTA);
            encode_varint_u32(out, elapsed_delta);
            encode_varint_u32(out, zigzag_encode(skew));
        }
        None => encode_absolute(timestamp, out),
    }
    Ok(())
}

fn delta_parts(timestamp: &Timestamp, previous: &Timestamp) -> Option<(u32, i32)> {
    let elapsed_delta = u32::try_from(timestamp.elapsed_millis - previous.elapsed_millis).ok()?;
    let epoch_delta = timestamp.epoch_millis.checked_sub(previous.epoch_millis)?;
    let skew = epoch_delta.checked_sub(i64::from(elapsed_delta))?;
    Some((elapsed_delta, i32::try_from(skew).ok()?))
}

fn encode_absolute(timestamp: &Timestamp, out: &mut Vec<u8>) {
    out.push(TAG_ABSOLUTE);
    out.extend_from_slice(&timestamp.elapsed_millis.to_le_bytes());
    out.extend_from_slice(&timestamp.epoch_millis.to_le_bytes());
}

/// Decode the record at `cursor.offset` in `data` (the whole data file).
///
/// Returns `None` when the cursor sits exactly at the end of `data`. On
/// success the cursor is advanced past the record and its bases updated; on
/// error it is left untouched.
///
/// # Errors
///
/// - `Error::CorruptRecord`: unknown tag, truncated value, overlong varint,
///   a DELTA record with no base, or elapsed time running backwards
pub fn decode_next(data: &[u8], cursor: &mut Cursor) -> Result<Option<Timestamp>> {
    let start = usize::try_from(cursor.offset).map_err(|_| cursor.corrupt("offset overflow"))?;
    if start == data.len() {
        return Ok(None);
    }
    let Some(&tag) = data.get(start) else {
        return Err(cursor.corrupt("offset past end of store"));
    };
    let mut pos = start + 1;

    let timestamp = match tag {
        TAG_DELTA => {
            let previous = cursor
                .previous()
                .ok_or_else(|| cursor.corrupt("delta record without a base"))?;
            let elapsed_delta =
                decode_varint_u32(data, &mut pos).map_err(|reason| cursor.corrupt(reason))?;
            let skew = decode_varint_u32(data, &mut pos)
                .map(zigzag_decode)
                .map_err(|reason| cursor.corrupt(reason))?;
            let elapsed_millis = previous
                .elapsed_millis
                .checked_add(u64::from(elapsed_delta))
                .ok_or_else(|| cursor.corrupt("elapsed time overflow"))?;
            let epoch_millis = previous
                .epoch_millis
                .checked_add(i64::from(elapsed_delta) + i64::from(skew))
                .ok_or_else(|| cursor.corrupt("epoch time overflow"))?;
            Timestamp::new(elapsed_millis, epoch_millis)
        }
        TAG_ABSOLUTE => {
            let body = data
                .get(pos..pos + ABSOLUTE_BODY_LEN)
                .ok_or_else(|| cursor.corrupt("truncated record"))?;
            pos += ABSOLUTE_BODY_LEN;
            let mut elapsed = [0u8; 8];
            let mut epoch = [0u8; 8];
            elapsed.copy_from_slice(&body[0..8]);
            epoch.copy_from_slice(&body[8..16]);
            let timestamp = Timestamp::new(u64::from_le_bytes(elapsed), i64::from_le_bytes(epoch));
            if let Some(previous) = cursor.previous() {
                if timestamp.elapsed_millis < previous.elapsed_millis {
                    return Err(cursor.corrupt("elapsed time regressed"));
                }
            }
            timestamp
        }
        _ => return Err(cursor.corrupt("unknown record tag")),
    };

    cursor.line += 1;
    cursor.offset = pos as u64;
    cursor.elapsed_millis = timestamp.elapsed_millis;
    cursor.epoch_millis = timestamp.epoch_millis;
    Ok(Some(timestamp))
}

fn encode_varint_u32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_varint_u32(data: &[u8], pos: &mut usize) -> std::result::Result<u32, &'static str> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT32_LEN {
        let byte = *data.get(*pos).ok_or("truncated record")?;
        *pos += 1;
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(value).map_err(|_| "varint exceeds 32 bits");
        }
    }
    Err("varint too long")
}

fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}
