//! Synthetic record builders for tests
//!
//! Shared by the unit tests and the integration tests under `tests/`.

use crate::formats::{cloud, modbus};
use crate::types::Timestamp;
use byteorder::{ByteOrder, LittleEndian};

fn put_split(raw: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u16(&mut raw[offset..], (value >> 16) as u16);
    LittleEndian::write_u16(&mut raw[offset + 2..], value as u16);
}

/// Format A record with the given flows (battery +charging, grid +export)
pub fn modbus_record(ts: Timestamp, solar: u32, load: u16, battery: i64, grid: i32, soc: u16) -> Vec<u8> {
    let mut raw = modbus::frame(ts, &[0u16; modbus::WORD_COUNT], ts);
    put_split(&mut raw, modbus::TOTAL_DC_INPUT_POWER, solar);
    put_split(&mut raw, modbus::METER_ACTIVE_POWER, grid as u32);
    LittleEndian::write_u16(&mut raw[modbus::HOUSE_LOAD_POWER..], load);
    put_split(&mut raw, modbus::BATTERY_POWER, battery.unsigned_abs() as u32);
    LittleEndian::write_u16(&mut raw[modbus::BATTERY_CURRENT_DIRECTION..], u16::from(battery < 0));
    LittleEndian::write_u16(&mut raw[modbus::BATTERY_SOC..], soc);
    raw
}

/// Format A record carrying only a timestamp
pub fn modbus_at(ts: Timestamp) -> Vec<u8> {
    modbus_record(ts, 0, 0, 0, 0, 0)
}

/// Format B record; battery power is `voltage * current / 100`
pub fn cloud_record(ts: Timestamp, solar: u16, load: u16, voltage: u16, current: i32, grid: i16, soc: u16) -> Vec<u8> {
    let mut raw = vec![0u8; cloud::RECORD_LEN];
    raw[..2].copy_from_slice(&cloud::LEADING_MAGIC);
    LittleEndian::write_u16(&mut raw[2..], cloud::PAYLOAD_LEN as u16);
    LittleEndian::write_u64(&mut raw[cloud::TIMESTAMP_OFFSET..], ts);
    raw[cloud::RECORD_LEN - 2..].copy_from_slice(&cloud::TRAILING_MAGIC);

    let payload = &mut raw[cloud::PAYLOAD_OFFSET..];
    LittleEndian::write_u16(&mut payload[cloud::SOLAR_POWER..], solar);
    LittleEndian::write_i16(&mut payload[cloud::GRID_POWER..], grid);
    LittleEndian::write_u16(&mut payload[cloud::BATTERY_VOLTAGE..], voltage);
    LittleEndian::write_u16(&mut payload[cloud::BATTERY_CURRENT..], current.unsigned_abs() as u16);
    LittleEndian::write_u16(&mut payload[cloud::BATTERY_CURRENT_DIRECTION..], u16::from(current < 0));
    LittleEndian::write_u16(&mut payload[cloud::BATTERY_SOC..], soc);
    LittleEndian::write_u16(&mut payload[cloud::LOAD_POWER..], load);
    raw
}

/// Format B record carrying only a timestamp
pub fn cloud_at(ts: Timestamp) -> Vec<u8> {
    cloud_record(ts, 0, 0, 0, 0, 0, 0)
}

/// Concatenate records into segment bytes
pub fn segment_bytes(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}
