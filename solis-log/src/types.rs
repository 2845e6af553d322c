//! Core types for the Solis log library
//!
//! This module defines the decoded sample every record format produces and the
//! error type shared by all library operations.

use crate::formats::RecordFormat;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Unix time in whole seconds, as stored in every log record
pub type Timestamp = u64;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, LogError>;

/// A decoded instantaneous power reading
///
/// Power values are in watts. Signs follow the inverter conventions:
/// battery is positive while charging, grid is positive while exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Unix time the record was captured
    pub timestamp: Timestamp,
    /// Total DC input (PV) power
    pub solar_w: i64,
    /// House load power
    pub load_w: i64,
    /// Unmeasured imbalance: `solar - load - battery - grid`
    pub inverter_residual_w: i64,
    /// Battery power (+charging / -discharging)
    pub battery_w: i64,
    /// Grid power (+export / -import)
    pub grid_w: i64,
    /// Battery state of charge in percent
    pub battery_soc_pct: u16,
}

impl Sample {
    /// Build a sample, deriving the inverter residual from the measured flows
    pub fn new(
        timestamp: Timestamp,
        solar_w: i64,
        load_w: i64,
        battery_w: i64,
        grid_w: i64,
        battery_soc_pct: u16,
    ) -> Self {
        Self {
            timestamp,
            solar_w,
            load_w,
            inverter_residual_w: solar_w - load_w - battery_w - grid_w,
            battery_w,
            grid_w,
            battery_soc_pct,
        }
    }

    /// Capture time as a UTC date-time (None if out of chrono's range)
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Errors that can occur while decoding, searching or polling
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid {format} record: expected magic {expected:02X?} at byte {offset}, found {found:02X?}")]
    InvalidMagic {
        format: RecordFormat,
        offset: usize,
        expected: [u8; 2],
        found: [u8; 2],
    },

    #[error("Invalid {format} record length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        format: RecordFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },

    #[error("Register read timed out for range ({first}, {last})")]
    ReadTimeout { first: u16, last: u16 },

    #[error("Poll failed after {attempts} connection resets")]
    PollFailed { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LogError {
    /// True for structural record violations (bad magic, bad length, bad field)
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            LogError::InvalidMagic { .. }
                | LogError::InvalidLength { .. }
                | LogError::MalformedField { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residual_is_derived() {
        let sample = Sample::new(1_700_000_000, 1500, 800, 200, -300, 85);
        assert_eq!(sample.inverter_residual_w, 800);
    }

    #[test]
    fn test_datetime_conversion() {
        let sample = Sample::new(86_400, 0, 0, 0, 0, 0);
        let dt = sample.datetime().unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "1970-01-02");
    }

    #[test]
    fn test_format_error_classification() {
        let err = LogError::InvalidMagic {
            format: RecordFormat::Modbus,
            offset: 0,
            expected: [0xAA, 0x55],
            found: [0x00, 0x00],
        };
        assert!(err.is_format_error());
        assert!(err.to_string().contains("Modbus"));

        let err = LogError::ReadTimeout { first: 33022, last: 33041 };
        assert!(!err.is_format_error());
    }
}
