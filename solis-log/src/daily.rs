//! Daily energy report
//!
//! Reads both segments of one UTC day in full, classifies each format's link
//! status, merges the samples and runs the energy allocation over the day.
//! The result feeds the monthly summary row and the chart series.

use crate::config::LogConfig;
use crate::energy::{link_status, EnergyFlowAllocator, EnergySummary, PowerPoint, StatusInterval};
use crate::formats::RecordFormat;
use crate::layout::{day_bounds, LogLayout};
use crate::merge::SampleMerger;
use crate::segment::LogSegment;
use crate::summary::{append_daily, DailySummaryRow};
use crate::types::{Result, Sample};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;

/// Link status of one record format over the day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatStatus {
    pub format: RecordFormat,
    pub samples: usize,
    pub intervals: Vec<StatusInterval>,
}

/// Per-sample chart data of one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSeries {
    pub date: NaiveDate,
    pub points: Vec<PowerPoint>,
    pub status: Vec<FormatStatus>,
}

/// Everything derived from one day of logs
#[derive(Debug, Clone)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub energy: EnergySummary,
    pub series: PowerSeries,
}

impl DailyReport {
    /// Row for the monthly summary file
    pub fn summary_row(&self) -> DailySummaryRow {
        DailySummaryRow {
            date: self.date,
            totals: self.energy.totals,
            soc_range: self.energy.soc_range,
        }
    }
}

/// Every decodable sample of one segment; empty if the file is absent
fn load_segment(layout: &LogLayout, format: RecordFormat, date: NaiveDate) -> Result<Vec<Sample>> {
    let path = layout.segment_path(format, date);
    match LogSegment::open(&path, format)? {
        Some(segment) => segment.samples()?.collect(),
        None => Ok(Vec::new()),
    }
}

/// Build the report for `date`
pub fn build_daily(layout: &LogLayout, date: NaiveDate, stale_gap_secs: u64) -> Result<DailyReport> {
    let (start, end) = day_bounds(date)?;

    let mut streams = Vec::with_capacity(RecordFormat::ALL.len());
    let mut status = Vec::with_capacity(RecordFormat::ALL.len());
    for format in RecordFormat::ALL {
        let samples = load_segment(layout, format, date)?;
        let timestamps: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        status.push(FormatStatus {
            format,
            samples: samples.len(),
            intervals: link_status(&timestamps, start, end, stale_gap_secs),
        });
        log::info!("{}: {} {} samples", date, samples.len(), format);
        streams.push(samples.into_iter().map(Ok));
    }

    let mut allocator = EnergyFlowAllocator::new(start, end);
    let mut points = Vec::new();
    for sample in SampleMerger::from_iter(streams) {
        let sample = sample?;
        points.push(PowerPoint::from(&sample));
        allocator.push(sample);
    }

    Ok(DailyReport {
        date,
        energy: allocator.finish(),
        series: PowerSeries {
            date,
            points,
            status,
        },
    })
}

/// Build the report for `date` and append it to the monthly summary
///
/// Returns the report and the summary file it was appended to.
pub fn process_day(config: &LogConfig, date: NaiveDate) -> Result<(DailyReport, PathBuf)> {
    let layout = LogLayout::from_config(config);
    let report = build_daily(&layout, date, config.stale_gap_secs)?;
    let path = layout.monthly_summary_path(date);
    append_daily(&path, &report.summary_row())?;
    Ok((report, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{LinkState, Sink, Source};
    use crate::layout::day_start;
    use crate::segment::append_record;
    use crate::summary::load_monthly;
    use crate::testutil::{cloud_record, modbus_record};
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    #[test]
    fn test_empty_day() {
        let dir = tempdir().unwrap();
        let layout = LogLayout::new(dir.path().join("log"), dir.path().join("html"));
        let report = build_daily(&layout, date(), 400).unwrap();
        assert_eq!(report.energy.samples, 0);
        assert!(report.energy.totals.values().all(|v| v == 0.0));
        assert!(report.series.points.is_empty());
        for status in &report.series.status {
            assert_eq!(status.intervals.len(), 1);
            assert_eq!(status.intervals[0].state, LinkState::Stale);
        }
    }

    #[test]
    fn test_constant_import_over_day() {
        let dir = tempdir().unwrap();
        let layout = LogLayout::new(dir.path().join("log"), dir.path().join("html"));
        let start = day_start(date()).unwrap();
        let path = layout.segment_path(RecordFormat::Modbus, date());
        // 1 kW house load fed from the grid every 5 minutes all day
        for i in 0..288 {
            let raw = modbus_record(start + i * 300, 0, 1000, 0, -1000, 50);
            append_record(&path, RecordFormat::Modbus, &raw).unwrap();
        }

        let report = build_daily(&layout, date(), 400).unwrap();
        let kwh = report.energy.totals.get(Source::Grid, Sink::House);
        assert!((kwh - 24.0).abs() < 1e-9, "{}", kwh);
        assert_eq!(report.energy.soc_range, (50, 50));

        let modbus = &report.series.status[0];
        assert_eq!(modbus.samples, 288);
        assert!(modbus.intervals.iter().all(|s| s.state == LinkState::Live));
        let cloud = &report.series.status[1];
        assert_eq!(cloud.intervals[0].state, LinkState::Stale);
    }

    #[test]
    fn test_process_day_appends_summary() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new()
            .with_data_dir(dir.path().join("log"))
            .with_report_dir(dir.path().join("html"));
        let layout = LogLayout::from_config(&config);
        let start = day_start(date()).unwrap();
        let path = layout.segment_path(RecordFormat::Cloud, date());
        append_record(&path, RecordFormat::Cloud, &cloud_record(start + 600, 2000, 500, 0, 0, 1500, 88)).unwrap();

        let (report, summary_path) = process_day(&config, date()).unwrap();
        assert_eq!(report.series.points.len(), 1);
        let rows = load_monthly(&summary_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, date());
        assert_eq!(rows[0].soc_range, (88, 88));
        // 1500 W export for 24 h
        assert_eq!(rows[0].totals.get(Source::Solar, Sink::Grid), 36.0);
    }
}
