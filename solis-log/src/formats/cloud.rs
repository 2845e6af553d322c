//! Format B: cloud capture records
//!
//! A 264-byte record wraps one 250-byte data frame sniffed on its way from the
//! data logger to the cloud:
//!
//! | Bytes     | Content                                |
//! |-----------|----------------------------------------|
//! | 0..2      | leading magic `A5 5A`                  |
//! | 2..4      | captured payload length                |
//! | 4..12     | capture time (u64 unix seconds)        |
//! | 12..262   | payload window (field offsets below)   |
//! | 262..264  | trailing magic `5A A5`                 |

use super::{read_i16, read_u16, read_u64};
use crate::types::Sample;

pub const RECORD_LEN: usize = 264;
pub const LEADING_MAGIC: [u8; 2] = [0xA5, 0x5A];
pub const TRAILING_MAGIC: [u8; 2] = [0x5A, 0xA5];
pub const TIMESTAMP_OFFSET: usize = 4;

/// Start of the payload window; field offsets are relative to it
pub const PAYLOAD_OFFSET: usize = 12;
pub const PAYLOAD_LEN: usize = 250;

pub(crate) const SOLAR_POWER: usize = 108;
pub(crate) const GRID_POWER: usize = 156;
pub(crate) const BATTERY_VOLTAGE: usize = 162;
pub(crate) const BATTERY_CURRENT: usize = 164;
pub(crate) const BATTERY_CURRENT_DIRECTION: usize = 166;
pub(crate) const BATTERY_SOC: usize = 172;
pub(crate) const LOAD_POWER: usize = 188;

/// Extract the sample fields from an already framed record
pub(crate) fn decode_fields(raw: &[u8]) -> Sample {
    let timestamp = read_u64(raw, TIMESTAMP_OFFSET);
    let payload = &raw[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN];

    let solar = i64::from(read_u16(payload, SOLAR_POWER));
    let grid = i64::from(read_i16(payload, GRID_POWER));
    let voltage = i64::from(read_u16(payload, BATTERY_VOLTAGE));
    let mut current = i64::from(read_u16(payload, BATTERY_CURRENT));
    if read_u16(payload, BATTERY_CURRENT_DIRECTION) != 0 {
        current = -current;
    }
    let soc = read_u16(payload, BATTERY_SOC);
    let load = i64::from(read_u16(payload, LOAD_POWER));

    Sample::new(timestamp, solar, load, battery_power(voltage, current), grid, soc)
}

/// Battery power in watts from voltage and current (both in tenths)
///
/// Rounds toward negative infinity.
pub fn battery_power(voltage: i64, current: i64) -> i64 {
    (voltage * current).div_euclid(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::RecordFormat;
    use crate::types::LogError;
    use byteorder::{ByteOrder, LittleEndian};

    fn put(raw: &mut [u8], field: usize, value: u16) {
        LittleEndian::write_u16(&mut raw[PAYLOAD_OFFSET + field..], value);
    }

    fn record(timestamp: u64) -> Vec<u8> {
        let mut raw = vec![0u8; RECORD_LEN];
        raw[..2].copy_from_slice(&LEADING_MAGIC);
        LittleEndian::write_u16(&mut raw[2..], PAYLOAD_LEN as u16);
        LittleEndian::write_u64(&mut raw[TIMESTAMP_OFFSET..], timestamp);
        raw[RECORD_LEN - 2..].copy_from_slice(&TRAILING_MAGIC);
        raw
    }

    #[test]
    fn test_decode_known_values() {
        let mut raw = record(1_700_000_300);
        put(&mut raw, SOLAR_POWER, 2000);
        put(&mut raw, GRID_POWER, (-250i16) as u16);
        put(&mut raw, BATTERY_VOLTAGE, 5200);
        put(&mut raw, BATTERY_CURRENT, 1000);
        put(&mut raw, BATTERY_SOC, 64);
        put(&mut raw, LOAD_POWER, 700);

        let sample = RecordFormat::Cloud.decode(&raw).unwrap();
        assert_eq!(sample.timestamp, 1_700_000_300);
        assert_eq!(sample.solar_w, 2000);
        assert_eq!(sample.grid_w, -250);
        assert_eq!(sample.battery_w, 52_000);
        assert_eq!(sample.load_w, 700);
        assert_eq!(sample.battery_soc_pct, 64);
        assert_eq!(sample.inverter_residual_w, 2000 - 700 - 52_000 + 250);
    }

    #[test]
    fn test_discharge_direction_negates_current() {
        let mut raw = record(1);
        put(&mut raw, BATTERY_VOLTAGE, 5000);
        put(&mut raw, BATTERY_CURRENT, 3);
        put(&mut raw, BATTERY_CURRENT_DIRECTION, 1);
        let sample = RecordFormat::Cloud.decode(&raw).unwrap();
        // 5000 * -3 = -15000 -> -150
        assert_eq!(sample.battery_w, -150);
    }

    #[test]
    fn test_battery_power_floors() {
        assert_eq!(battery_power(101, 1), 1);
        assert_eq!(battery_power(101, -1), -2);
        assert_eq!(battery_power(0, -7), 0);
    }

    #[test]
    fn test_grid_sign_boundary() {
        let mut raw = record(1);
        put(&mut raw, GRID_POWER, 0x8000);
        assert_eq!(RecordFormat::Cloud.decode(&raw).unwrap().grid_w, -32768);
        put(&mut raw, GRID_POWER, 0x7FFF);
        assert_eq!(RecordFormat::Cloud.decode(&raw).unwrap().grid_w, 32767);
    }

    #[test]
    fn test_any_magic_byte_corruption_rejected() {
        let raw = record(1);
        for offset in [0, 1, RECORD_LEN - 2, RECORD_LEN - 1] {
            let mut bad = raw.clone();
            bad[offset] = bad[offset].wrapping_add(1);
            assert!(matches!(
                RecordFormat::Cloud.decode(&bad),
                Err(LogError::InvalidMagic { .. })
            ));
        }
    }
}
