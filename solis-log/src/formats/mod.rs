//! Fixed-length record formats (Modbus capture, cloud capture)
//!
//! Each log segment holds records of exactly one format. A format is selected
//! by its [`RecordFormat`] tag and owns its framing (length, magics,
//! timestamp offset) and its field layout.

use crate::types::{LogError, Result, Sample, Timestamp};
use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

pub mod cloud;
pub mod modbus;

/// On-disk record format of a log segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordFormat {
    /// Format A: 306-byte frames built by the Modbus poller
    Modbus,
    /// Format B: 264-byte frames captured from the logger's cloud upload
    Cloud,
}

impl RecordFormat {
    /// All formats, in merge priority order (ties favour the earlier entry)
    pub const ALL: [RecordFormat; 2] = [RecordFormat::Modbus, RecordFormat::Cloud];

    /// Fixed record length in bytes
    pub const fn record_len(self) -> usize {
        match self {
            RecordFormat::Modbus => modbus::RECORD_LEN,
            RecordFormat::Cloud => cloud::RECORD_LEN,
        }
    }

    /// Two-byte marker at the start of every record
    pub const fn leading_magic(self) -> [u8; 2] {
        match self {
            RecordFormat::Modbus => modbus::LEADING_MAGIC,
            RecordFormat::Cloud => cloud::LEADING_MAGIC,
        }
    }

    /// Two-byte marker at the end of every record
    pub const fn trailing_magic(self) -> [u8; 2] {
        match self {
            RecordFormat::Modbus => modbus::TRAILING_MAGIC,
            RecordFormat::Cloud => cloud::TRAILING_MAGIC,
        }
    }

    /// Byte offset of the 8-byte capture timestamp
    pub const fn timestamp_offset(self) -> usize {
        match self {
            RecordFormat::Modbus => modbus::TIMESTAMP_OFFSET,
            RecordFormat::Cloud => cloud::TIMESTAMP_OFFSET,
        }
    }

    /// Segment file name for one UTC calendar day
    pub fn file_name(self, date: NaiveDate) -> String {
        match self {
            RecordFormat::Modbus => format!("Solis_{}.dat", date.format("%Y%m%d")),
            RecordFormat::Cloud => format!("Solis_R250_{}.cap", date.format("%Y%m%d")),
        }
    }

    /// Validate length and both magics of a raw record
    pub fn check_frame(self, raw: &[u8]) -> Result<()> {
        let expected = self.record_len();
        if raw.len() != expected {
            return Err(LogError::InvalidLength {
                format: self,
                expected,
                actual: raw.len(),
            });
        }
        check_magic(self, raw, 0, self.leading_magic())?;
        check_magic(self, raw, expected - 2, self.trailing_magic())
    }

    /// Decode a raw record into a sample
    ///
    /// Any magic or length violation rejects the record; callers decide whether
    /// that is fatal (strict dump) or a skip (queries and reports).
    pub fn decode(self, raw: &[u8]) -> Result<Sample> {
        self.check_frame(raw)?;
        let sample = match self {
            RecordFormat::Modbus => modbus::decode_fields(raw),
            RecordFormat::Cloud => cloud::decode_fields(raw),
        };
        Ok(sample)
    }

    /// Read only the timestamp of a framed record
    pub fn timestamp(self, raw: &[u8]) -> Result<Timestamp> {
        self.check_frame(raw)?;
        Ok(read_u64(raw, self.timestamp_offset()))
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFormat::Modbus => write!(f, "Modbus"),
            RecordFormat::Cloud => write!(f, "Cloud"),
        }
    }
}

fn check_magic(format: RecordFormat, raw: &[u8], offset: usize, expected: [u8; 2]) -> Result<()> {
    let found = [raw[offset], raw[offset + 1]];
    if found != expected {
        return Err(LogError::InvalidMagic {
            format,
            offset,
            expected,
            found,
        });
    }
    Ok(())
}

/// Unsigned 16-bit little-endian word at `offset`
pub(crate) fn read_u16(raw: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&raw[offset..offset + 2])
}

/// Two's-complement 16-bit word at `offset`
pub(crate) fn read_i16(raw: &[u8], offset: usize) -> i16 {
    LittleEndian::read_i16(&raw[offset..offset + 2])
}

/// 32-bit value held in two consecutive registers, high word first
///
/// Each register is stored little-endian, so this is `(hi << 16) | lo` and
/// NOT a native little-endian 32-bit load.
pub(crate) fn read_split_u32(raw: &[u8], offset: usize) -> u32 {
    let hi = u32::from(read_u16(raw, offset));
    let lo = u32::from(read_u16(raw, offset + 2));
    (hi << 16) | lo
}

/// Split-register 32-bit value reinterpreted as two's complement
pub(crate) fn read_split_i32(raw: &[u8], offset: usize) -> i32 {
    read_split_u32(raw, offset) as i32
}

/// Unsigned 64-bit little-endian value at `offset`
pub(crate) fn read_u64(raw: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&raw[offset..offset + 8])
}
