//! Format A: Modbus capture records
//!
//! Layout of a 306-byte record (all little-endian):
//!
//! | Bytes     | Content                                   |
//! |-----------|-------------------------------------------|
//! | 0..2      | leading magic `AA 55`                     |
//! | 2..10     | poll start time (u64 unix seconds)        |
//! | 10..296   | 143 input-register words, in range order  |
//! | 296..304  | poll end time (u64 unix seconds)          |
//! | 304..306  | trailing magic `55 AA`                    |

use super::{read_split_i32, read_split_u32, read_u16, read_u64, RecordFormat};
use crate::types::{LogError, Result, Sample, Timestamp};
use byteorder::{ByteOrder, LittleEndian};

pub const RECORD_LEN: usize = 306;
pub const LEADING_MAGIC: [u8; 2] = [0xAA, 0x55];
pub const TRAILING_MAGIC: [u8; 2] = [0x55, 0xAA];
pub const TIMESTAMP_OFFSET: usize = 2;

/// Input-register ranges polled per record, `(first, last)` half-open
pub const REGISTER_RANGES: [(u16, u16); 9] = [
    (33022, 33041),
    (33049, 33059),
    (33071, 33085),
    (33091, 33096),
    (33100, 33107),
    (33126, 33151),
    (33161, 33181),
    (33251, 33287),
    (33115, 33122),
];

/// Number of register words carried by one record
pub const WORD_COUNT: usize = 143;

const WORDS_OFFSET: usize = 10;
const END_TIME_OFFSET: usize = 296;

pub(crate) const TOTAL_DC_INPUT_POWER: usize = 64;
pub(crate) const METER_ACTIVE_POWER: usize = 128;
pub(crate) const BATTERY_CURRENT_DIRECTION: usize = 138;
pub(crate) const BATTERY_SOC: usize = 146;
pub(crate) const HOUSE_LOAD_POWER: usize = 162;
pub(crate) const BATTERY_POWER: usize = 166;

/// Extract the sample fields from an already framed record
pub(crate) fn decode_fields(raw: &[u8]) -> Sample {
    let timestamp = read_u64(raw, TIMESTAMP_OFFSET);
    let solar = i64::from(read_split_u32(raw, TOTAL_DC_INPUT_POWER));
    let grid = i64::from(read_split_i32(raw, METER_ACTIVE_POWER));
    let load = i64::from(read_u16(raw, HOUSE_LOAD_POWER));

    let mut battery = i64::from(read_split_u32(raw, BATTERY_POWER));
    if read_u16(raw, BATTERY_CURRENT_DIRECTION) != 0 {
        battery = -battery;
    }

    let soc = read_u16(raw, BATTERY_SOC);
    Sample::new(timestamp, solar, load, battery, grid, soc)
}

/// Poll end time of a framed record
pub fn end_time(raw: &[u8]) -> Result<Timestamp> {
    RecordFormat::Modbus.check_frame(raw)?;
    Ok(read_u64(raw, END_TIME_OFFSET))
}

/// Frame the register words of one poll cycle into a record
pub fn encode_frame(start: Timestamp, words: &[u16], end: Timestamp) -> Result<Vec<u8>> {
    let words: &[u16; WORD_COUNT] = words.try_into().map_err(|_| LogError::MalformedField {
        field: "register words",
        reason: format!("expected {} words, got {}", WORD_COUNT, words.len()),
    })?;
    Ok(frame(start, words, end))
}

/// Frame a complete register read
pub fn frame(start: Timestamp, words: &[u16; WORD_COUNT], end: Timestamp) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_LEN];
    record[..2].copy_from_slice(&LEADING_MAGIC);
    LittleEndian::write_u64(&mut record[TIMESTAMP_OFFSET..WORDS_OFFSET], start);
    LittleEndian::write_u16_into(words, &mut record[WORDS_OFFSET..END_TIME_OFFSET]);
    LittleEndian::write_u64(&mut record[END_TIME_OFFSET..RECORD_LEN - 2], end);
    record[RECORD_LEN - 2..].copy_from_slice(&TRAILING_MAGIC);
    record
}
