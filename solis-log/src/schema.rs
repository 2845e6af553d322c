//! Schema-driven register dump decoder
//!
//! Walks a [`RegisterSchema`] over a full Modbus capture record and renders
//! every register as a formatted CSV cell. Used by the strict diagnostic dump,
//! where any structural violation is a hard error.

use crate::formats::{self, RecordFormat};
use crate::types::{LogError, Result};
use chrono::{DateTime, NaiveDate};

/// Raw layout of one schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Two fixed marker bytes, checked but not emitted
    Magic([u8; 2]),
    /// Unix time, 8 bytes
    Time64,
    /// Six 16-bit words: year (since 2000), month, day, hour, minute, second
    DateTime96,
    /// Filler register, skipped
    Unused16,
    U16,
    S16,
    /// Two registers, high word first
    U32,
    /// Two registers, high word first, two's complement
    S32,
    /// Unsigned 16-bit magnitude negated when the direction word at
    /// `flag_offset` bytes from this field is nonzero
    Directed16 { flag_offset: isize },
    /// Split-register magnitude with a separate direction word
    Directed32 { flag_offset: isize },
}

impl FieldKind {
    /// Width of the field in bytes
    pub const fn width(&self) -> usize {
        match self {
            FieldKind::Magic(_) | FieldKind::Unused16 => 2,
            FieldKind::U16 | FieldKind::S16 | FieldKind::Directed16 { .. } => 2,
            FieldKind::U32 | FieldKind::S32 | FieldKind::Directed32 { .. } => 4,
            FieldKind::Time64 => 8,
            FieldKind::DateTime96 => 12,
        }
    }

    /// True if the field produces an output column
    pub const fn is_emitted(&self) -> bool {
        !matches!(self, FieldKind::Magic(_) | FieldKind::Unused16)
    }
}

/// Rendering of a decoded field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Integer as-is
    Unit,
    /// Divided by 10, one decimal
    Tenths,
    /// Divided by 100, two decimals
    Hundredths,
    /// Divided by 1000, three decimals
    Thousandths,
    /// Absolute UTC time, `YYYY-MM-DD HH:MM:SS`
    Time,
}

/// One typed register field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub kind: FieldKind,
    pub scale: Scale,
    pub label: &'static str,
}

const fn field(kind: FieldKind, scale: Scale, label: &'static str) -> RegisterField {
    RegisterField { kind, scale, label }
}

/// An ordered list of fields covering a whole record
#[derive(Debug, Clone, Copy)]
pub struct RegisterSchema {
    format: RecordFormat,
    fields: &'static [RegisterField],
}

impl RegisterSchema {
    pub const fn new(format: RecordFormat, fields: &'static [RegisterField]) -> Self {
        Self { format, fields }
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }

    pub fn fields(&self) -> &'static [RegisterField] {
        self.fields
    }

    /// Total bytes consumed by the schema
    pub fn record_len(&self) -> usize {
        self.fields.iter().map(|f| f.kind.width()).sum()
    }

    /// Labels of the emitted columns, in order
    pub fn labels(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.kind.is_emitted())
            .map(|f| f.label)
            .collect()
    }

    /// Byte offset of the field with the given label
    pub fn offset_of(&self, label: &str) -> Option<usize> {
        let mut offset = 0;
        for f in self.fields {
            if f.label == label {
                return Some(offset);
            }
            offset += f.kind.width();
        }
        None
    }

    /// Decode one record into formatted cells, one per emitted field
    pub fn decode_row(&self, raw: &[u8]) -> Result<Vec<String>> {
        let expected = self.record_len();
        if raw.len() != expected {
            return Err(LogError::InvalidLength {
                format: self.format,
                expected,
                actual: raw.len(),
            });
        }

        let mut cells = Vec::with_capacity(self.fields.len());
        let mut addr = 0;
        for f in self.fields {
            match f.kind {
                FieldKind::Magic(expected) => {
                    let found = [raw[addr], raw[addr + 1]];
                    if found != expected {
                        return Err(LogError::InvalidMagic {
                            format: self.format,
                            offset: addr,
                            expected,
                            found,
                        });
                    }
                }
                FieldKind::Unused16 => {}
                kind => {
                    let value = decode_value(raw, addr, kind, f.label)?;
                    cells.push(render(value, f.scale, f.label)?);
                }
            }
            addr += f.kind.width();
        }
        Ok(cells)
    }
}

fn decode_value(raw: &[u8], addr: usize, kind: FieldKind, label: &'static str) -> Result<i64> {
    let value = match kind {
        FieldKind::Time64 => {
            let t = formats::read_u64(raw, addr);
            i64::try_from(t).map_err(|_| LogError::MalformedField {
                field: label,
                reason: format!("timestamp {} out of range", t),
            })?
        }
        FieldKind::DateTime96 => decode_datetime96(raw, addr, label)?,
        FieldKind::U16 => i64::from(formats::read_u16(raw, addr)),
        FieldKind::S16 => i64::from(formats::read_i16(raw, addr)),
        FieldKind::U32 => i64::from(formats::read_split_u32(raw, addr)),
        FieldKind::S32 => i64::from(formats::read_split_i32(raw, addr)),
        FieldKind::Directed16 { flag_offset } => {
            let v = i64::from(formats::read_u16(raw, addr));
            apply_direction(raw, addr, flag_offset, v, label)?
        }
        FieldKind::Directed32 { flag_offset } => {
            let v = i64::from(formats::read_split_u32(raw, addr));
            apply_direction(raw, addr, flag_offset, v, label)?
        }
        FieldKind::Magic(_) | FieldKind::Unused16 => 0,
    };
    Ok(value)
}

fn apply_direction(
    raw: &[u8],
    addr: usize,
    flag_offset: isize,
    value: i64,
    label: &'static str,
) -> Result<i64> {
    let flag_addr = addr
        .checked_add_signed(flag_offset)
        .filter(|a| a + 2 <= raw.len())
        .ok_or_else(|| LogError::MalformedField {
            field: label,
            reason: format!("direction flag offset {} outside record", flag_offset),
        })?;
    if formats::read_u16(raw, flag_addr) != 0 {
        Ok(-value)
    } else {
        Ok(value)
    }
}

/// Sum the six date/time words into unix seconds
///
/// Day and time words are added linearly, so out-of-range values roll over
/// instead of failing; only year and month must form a valid date.
fn decode_datetime96(raw: &[u8], addr: usize, label: &'static str) -> Result<i64> {
    let w: Vec<i64> = (0..6)
        .map(|i| i64::from(formats::read_u16(raw, addr + 2 * i)))
        .collect();
    let year = w[0] + 2000;
    let month_start = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, w[1] as u32, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| LogError::MalformedField {
            field: label,
            reason: format!("invalid date {}-{:02}", year, w[1]),
        })?;
    Ok(month_start.and_utc().timestamp() + (w[2] - 1) * 86_400 + w[3] * 3600 + w[4] * 60 + w[5])
}

fn render(value: i64, scale: Scale, label: &'static str) -> Result<String> {
    let cell = match scale {
        Scale::Unit => format!("{}", value),
        Scale::Tenths => format!("{:3.1}", value as f64 / 10.0),
        Scale::Hundredths => format!("{:4.2}", value as f64 / 100.0),
        Scale::Thousandths => format!("{:5.3}", value as f64 / 1000.0),
        Scale::Time => DateTime::from_timestamp(value, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .ok_or_else(|| LogError::MalformedField {
                field: label,
                reason: format!("time {} out of range", value),
            })?,
    };
    Ok(cell)
}

use FieldKind::*;
use Scale::*;

/// Full register layout of a Modbus capture record
pub const SOLIS_REGISTERS: RegisterSchema = RegisterSchema::new(
    RecordFormat::Modbus,
    &[
        field(Magic([0xAA, 0x55]), Unit, "Leading Magic"),
        field(Time64, Time, "Data time"),
        field(DateTime96, Time, "System Time"),
        field(Unused16, Unit, "Not Used"),
        field(U32, Unit, "Total Generation (kWh)"),
        field(U32, Unit, "Generated This Month (kWh)"),
        field(U32, Unit, "Generated Last Month (kWh)"),
        field(U16, Tenths, "Generated Today (kWh)"),
        field(U16, Tenths, "Generated Yesterday (kWh)"),
        field(U32, Unit, "Generated This Year (kWh)"),
        field(U32, Unit, "Generated Last Year (kWh)"),
        field(U16, Tenths, "DC Voltage 1 (V)"),
        field(U16, Tenths, "DC Current 1 (A)"),
        field(U16, Tenths, "DC Voltage 2 (V)"),
        field(U16, Tenths, "DC Current 2 (A)"),
        field(U16, Tenths, "DC Voltage 3 (V)"),
        field(U16, Tenths, "DC Current 3 (A)"),
        field(U16, Tenths, "DC Voltage 4 (V)"),
        field(U16, Tenths, "DC Current 4 (A)"),
        field(U32, Unit, "Total DC Input Power (W)"),
        field(U16, Tenths, "DC bus Voltage (V)"),
        field(U16, Tenths, "DC bus half Voltage (V)"),
        field(U16, Tenths, "Phase A Voltage (V)"),
        field(U16, Tenths, "Phase B Voltage (V)"),
        field(U16, Tenths, "Phase C Voltage (V)"),
        field(U16, Tenths, "Phase A Current (A)"),
        field(U16, Tenths, "Phase B Current (A)"),
        field(U16, Tenths, "Phase C Current (A)"),
        field(S32, Unit, "Active Power (W)"),
        field(S32, Unit, "Reactive power (W)"),
        field(S32, Unit, "Apparent Power (VA)"),
        field(U16, Unit, "Standard Working Mode"),
        field(U16, Unit, "National Standard"),
        field(U16, Tenths, "Inverter Temperature (C)"),
        field(U16, Hundredths, "Grid Frequency (Hz)"),
        field(U16, Unit, "Current State Of Inverter"),
        field(S32, Unit, "Limit Active Power Output (W)"),
        field(S32, Unit, "Limit Reactive Power Output (W)"),
        field(U16, Hundredths, "Actual Power Limited Power (%)"),
        field(S16, Thousandths, "Actual Adjustment ()"),
        field(S16, Unit, "Limit Reactive Power (%)"),
        field(U32, Unit, "Electricity Meter Total Energy (Wh)"),
        field(U16, Tenths, "Meter Voltage (V)"),
        field(U16, Tenths, "Meter Current (A)"),
        field(S32, Unit, "Meter Active Power (W)"),
        field(U16, Unit, "Energy Storage Mode"),
        field(U16, Tenths, "Battery Voltage (V)"),
        field(Directed16 { flag_offset: 2 }, Tenths, "Battery Current (A)"),
        field(U16, Unit, "Battery Current Direction (0=Charging, 1=Discharging)"),
        field(U16, Tenths, "LLCbus Voltage (V)"),
        field(U16, Tenths, "Bypass AC Voltage (V)"),
        field(U16, Tenths, "Bypass AC Current (A)"),
        field(U16, Unit, "Battery Capacity SOC (%)"),
        field(U16, Unit, "Battery Health SOH (%)"),
        field(U16, Hundredths, "Battery Voltage BMS (V)"),
        field(S16, Hundredths, "Battery Current BMS (A)"),
        field(U16, Tenths, "Battery Charge Current Limit (A)"),
        field(U16, Tenths, "Battery Discharge Current Limit (A)"),
        field(U16, Unit, "Battery Failure Information 01"),
        field(U16, Unit, "Battery Failure Information 02"),
        field(U16, Unit, "House Load Power (W)"),
        field(U16, Unit, "Bypass Load Power (W)"),
        field(Directed32 { flag_offset: -28 }, Unit, "Battery Power (W)"),
        field(U32, Unit, "Total Battery Charge (kWh)"),
        field(U16, Tenths, "Today Battery Charge (kWh)"),
        field(U16, Tenths, "Yesterday Battery Charge (kWh)"),
        field(U32, Unit, "Total Battery Discharge (kWh)"),
        field(U16, Tenths, "Battery Discharge Capacity (kWh)"),
        field(U16, Tenths, "Yesterday Battery Discharge (kWh)"),
        field(U32, Unit, "Total Imported Energy (kWh)"),
        field(U16, Tenths, "Today Imported Energy (kWh)"),
        field(U16, Tenths, "Yesterday Imported Energy (kWh)"),
        field(U32, Unit, "Total Exported Energy (kWh)"),
        field(U16, Tenths, "Today Exported Energy (kWh)"),
        field(U16, Tenths, "Yesterday Exported Energy (kWh)"),
        field(U32, Unit, "Total House Load (kWh)"),
        field(U16, Tenths, "Today House Load (kWh)"),
        field(U16, Tenths, "Yesterday House Load (kWh)"),
        field(U16, Tenths, "Meter AC Voltage A (V)"),
        field(U16, Hundredths, "Meter AC Current A (A)"),
        field(U16, Tenths, "Meter AC Voltage B (V)"),
        field(U16, Hundredths, "Meter AC Current B (A)"),
        field(U16, Tenths, "Meter AC Voltage C (V)"),
        field(U16, Hundredths, "Meter AC Current C (A)"),
        field(S32, Thousandths, "Meter Active Power A (kW)"),
        field(S32, Thousandths, "Meter Active Power B (kW)"),
        field(S32, Thousandths, "Meter Active Power C (kW)"),
        field(S32, Thousandths, "Meter Total active Power (kW)"),
        field(S32, Unit, "Meter Active Reactive Power A (VA)"),
        field(S32, Unit, "Meter Active Reactive Power B (VA)"),
        field(S32, Unit, "Meter Active Reactive Power C (VA)"),
        field(S32, Unit, "Meter Total Reactive Power (VA)"),
        field(S32, Unit, "Meter Active Apparent Power A (VA)"),
        field(S32, Unit, "Meter Active Apparent Power B (VA)"),
        field(S32, Unit, "Meter Active Apparent Power C (VA)"),
        field(S32, Unit, "Meter Total Apparent Power (VA)"),
        field(S16, Unit, "Meter Power Factor"),
        field(U16, Hundredths, "Meter Grid Frequency (Hz)"),
        field(U32, Hundredths, "Meter Total Active Imported (kWh)"),
        field(U32, Hundredths, "Meter Total Active Exported (kWh)"),
        field(U16, Unit, "Set The Flag Bit"),
        field(U16, Unit, "Fault Code 01"),
        field(U16, Unit, "Fault Code 02"),
        field(U16, Unit, "Fault Code 03"),
        field(U16, Unit, "Fault Code 04"),
        field(U16, Unit, "Fault Code 05"),
        field(U16, Unit, "Working Status"),
        field(Time64, Time, "End data time"),
        field(Magic([0x55, 0xAA]), Unit, "Trailing Magic"),
    ],
);
