//! On-disk layout of segments and reports
//!
//! Files are grouped by UTC year and month:
//! `<data_dir>/YYYY/MM/Solis_YYYYMMDD.dat`,
//! `<data_dir>/YYYY/MM/Solis_R250_YYYYMMDD.cap`,
//! `<report_dir>/YYYY/MM/Solis_Monthly_YYYYMM.csv` and
//! `<report_dir>/YYYY/MM/Power_YYYYMMDD.json`.

use crate::config::LogConfig;
use crate::formats::RecordFormat;
use crate::types::{LogError, Result, Timestamp};
use chrono::{DateTime, Datelike, NaiveDate};
use std::path::{Path, PathBuf};

/// Seconds per UTC day
pub const SECS_PER_DAY: u64 = 86_400;

/// Path builder for one data and report tree
#[derive(Debug, Clone)]
pub struct LogLayout {
    data_dir: PathBuf,
    report_dir: PathBuf,
}

impl LogLayout {
    pub fn new(data_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            report_dir: report_dir.into(),
        }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(&config.data_dir, &config.report_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Segment file of one format for one day
    pub fn segment_path(&self, format: RecordFormat, date: NaiveDate) -> PathBuf {
        month_dir(&self.data_dir, date).join(format.file_name(date))
    }

    /// Monthly summary CSV for the month containing `date`
    pub fn monthly_summary_path(&self, date: NaiveDate) -> PathBuf {
        month_dir(&self.report_dir, date).join(format!("Solis_Monthly_{}.csv", date.format("%Y%m")))
    }

    /// Chart series for one day
    pub fn power_series_path(&self, date: NaiveDate) -> PathBuf {
        month_dir(&self.report_dir, date).join(format!("Power_{}.json", date.format("%Y%m%d")))
    }
}

fn month_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
}

/// UTC calendar day containing `t`
pub fn utc_date(t: Timestamp) -> Result<NaiveDate> {
    i64::try_from(t)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive())
        .ok_or_else(|| LogError::InvalidDate(format!("timestamp {} out of range", t)))
}

/// Unix time of 00:00 UTC on `date`
pub fn day_start(date: NaiveDate) -> Result<Timestamp> {
    let secs = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| LogError::InvalidDate(date.to_string()))?;
    u64::try_from(secs).map_err(|_| LogError::InvalidDate(format!("{} is before 1970", date)))
}

/// `[start, end)` of the UTC day `date`
pub fn day_bounds(date: NaiveDate) -> Result<(Timestamp, Timestamp)> {
    let start = day_start(date)?;
    Ok((start, start + SECS_PER_DAY))
}
