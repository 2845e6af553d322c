//! Point-in-time query over one day of logs
//!
//! Streams every sample at or after a requested time from both segments of a
//! day, merged by timestamp, as CSV rows
//! `timestamp,load_w,solar_w,battery_w,grid_w,soc_pct`, followed by a line
//! holding the last timestamp seen from each format (`0` if none).

use crate::formats::RecordFormat;
use crate::layout::LogLayout;
use crate::merge::SampleMerger;
use crate::segment::{read_segment_since, SegmentCursor};
use crate::types::{Result, Sample, Timestamp};
use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufReader, Write};
use std::iter::Flatten;

/// Response header emitted first in CGI mode
pub const CSV_CONTENT_HEADER: &str = "Content-type: text/csv\n\n";

/// Sample stream of one format; empty when the segment is absent
pub type FormatStream = Flatten<std::option::IntoIter<SegmentCursor<BufReader<File>>>>;

/// Outcome of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuerySummary {
    /// Data rows written
    pub rows: usize,
    /// Last format A timestamp written, 0 if none
    pub last_modbus: Timestamp,
    /// Last format B timestamp written, 0 if none
    pub last_cloud: Timestamp,
}

/// Open both segments of `date`, positioned at the first sample ≥ `from`
///
/// Streams are in [`RecordFormat::ALL`] order.
pub fn open_streams(layout: &LogLayout, date: NaiveDate, from: Timestamp) -> Result<Vec<FormatStream>> {
    RecordFormat::ALL
        .iter()
        .map(|&format| {
            let path = layout.segment_path(format, date);
            Ok(read_segment_since(&path, format, from)?.into_iter().flatten())
        })
        .collect()
}

/// Merged samples of `date` from time `from`
pub fn merged_samples(
    layout: &LogLayout,
    date: NaiveDate,
    from: Timestamp,
) -> Result<SampleMerger<FormatStream>> {
    Ok(open_streams(layout, date, from)?.into_iter().collect())
}

/// Write the query response for `date` from time `from` to `out`
///
/// With `cgi_header` the content header is written first, even if no
/// samples follow.
pub fn write_query<W: Write>(
    layout: &LogLayout,
    date: NaiveDate,
    from: Timestamp,
    mut out: W,
    cgi_header: bool,
) -> Result<QuerySummary> {
    if cgi_header {
        out.write_all(CSV_CONTENT_HEADER.as_bytes())?;
    }

    let mut merger = merged_samples(layout, date, from)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(out);

    let mut rows = 0;
    for sample in merger.by_ref() {
        write_row(&mut writer, &sample?)?;
        rows += 1;
    }

    let last = merger.last_timestamps();
    let summary = QuerySummary {
        rows,
        last_modbus: last[0].unwrap_or(0),
        last_cloud: last[1].unwrap_or(0),
    };
    writer.write_record([summary.last_modbus.to_string(), summary.last_cloud.to_string()])?;
    writer.flush()?;

    log::debug!("Query {} from {} returned {} rows", date, from, rows);
    Ok(summary)
}

fn write_row<W: Write>(writer: &mut csv::Writer<W>, s: &Sample) -> Result<()> {
    writer.write_record([
        s.timestamp.to_string(),
        s.load_w.to_string(),
        s.solar_w.to_string(),
        s.battery_w.to_string(),
        s.grid_w.to_string(),
        s.battery_soc_pct.to_string(),
    ])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::append_record;
    use crate::testutil::{cloud_record, modbus_record};
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, 14).unwrap()
    }

    fn run(layout: &LogLayout, from: Timestamp, cgi: bool) -> (String, QuerySummary) {
        let mut out = Vec::new();
        let summary = write_query(layout, date(), from, &mut out, cgi).unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    #[test]
    fn test_empty_day_still_emits_header_and_summary() {
        let dir = tempdir().unwrap();
        let layout = LogLayout::new(dir.path(), dir.path());
        let (text, summary) = run(&layout, 0, true);
        assert_eq!(text, "Content-type: text/csv\n\n0,0\n");
        assert_eq!(summary.rows, 0);
    }

    #[test]
    fn test_merges_both_formats() {
        let dir = tempdir().unwrap();
        let layout = LogLayout::new(dir.path(), dir.path());
        let a = layout.segment_path(RecordFormat::Modbus, date());
        let b = layout.segment_path(RecordFormat::Cloud, date());
        for t in [1_700_000_000, 1_700_000_060, 1_700_000_120] {
            append_record(&a, RecordFormat::Modbus, &modbus_record(t, 1500, 800, 200, -300, 85)).unwrap();
        }
        for t in [1_700_000_030, 1_700_000_090] {
            append_record(&b, RecordFormat::Cloud, &cloud_record(t, 900, 400, 5000, -20, 100, 70)).unwrap();
        }

        let (text, summary) = run(&layout, 1_700_000_050, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1700000060,800,1500,200,-300,85",
                "1700000090,400,900,-1000,100,70",
                "1700000120,800,1500,200,-300,85",
                "1700000120,1700000090",
            ]
        );
        assert_eq!(summary.rows, 3);
    }

    #[test]
    fn test_one_format_missing() {
        let dir = tempdir().unwrap();
        let layout = LogLayout::new(dir.path(), dir.path());
        let b = layout.segment_path(RecordFormat::Cloud, date());
        append_record(&b, RecordFormat::Cloud, &cloud_record(1_700_000_030, 1, 2, 0, 0, 0, 3)).unwrap();

        let (text, summary) = run(&layout, 0, false);
        assert_eq!(text, "1700000030,2,1,0,0,3\n0,1700000030\n");
        assert_eq!(summary.last_modbus, 0);
        assert_eq!(summary.last_cloud, 1_700_000_030);
    }
}
