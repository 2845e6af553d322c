//! Monthly energy summary file
//!
//! One CSV per month with a row per processed day: the date, the twelve
//! source-to-sink energies in kWh and the day's battery SoC range. The file
//! is created with a header on first use and appended to afterwards.

use crate::energy::{EnergyTotals, Sink, Source};
use crate::types::{LogError, Result};
use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Columns before the energy values
const DATE_COLUMNS: usize = 3;
/// Columns of a row without the SoC range
const MIN_COLUMNS: usize = DATE_COLUMNS + 12;
/// Columns of a row with the SoC range
const FULL_COLUMNS: usize = MIN_COLUMNS + 2;

/// One day of the monthly summary
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummaryRow {
    pub date: NaiveDate,
    pub totals: EnergyTotals,
    /// Battery SoC `(min, max)`; `(0, 0)` for a day without samples
    pub soc_range: (u16, u16),
}

/// Header record of the summary file
pub fn summary_header() -> Vec<String> {
    let mut header: Vec<String> = ["Year", "Month", "Day"].iter().map(|s| s.to_string()).collect();
    for source in Source::ALL {
        for sink in Sink::ALL {
            header.push(format!("{} to {}", source.label(), sink.label()));
        }
    }
    header.push("SoC Min".to_string());
    header.push("SoC Max".to_string());
    header
}

impl DailySummaryRow {
    fn to_record(&self) -> Vec<String> {
        use chrono::Datelike;
        let mut record = vec![
            self.date.year().to_string(),
            self.date.month().to_string(),
            self.date.day().to_string(),
        ];
        record.extend(self.totals.values().map(|kwh| format!("{:5.3}", kwh)));
        record.push(self.soc_range.0.to_string());
        record.push(self.soc_range.1.to_string());
        record
    }

    fn from_record(record: &csv::StringRecord) -> Result<Self> {
        let int = |idx: usize, field: &'static str| -> Result<u32> {
            record[idx].trim().parse().map_err(|_| LogError::MalformedField {
                field,
                reason: format!("'{}' is not an integer", &record[idx]),
            })
        };
        let year = int(0, "Year")?;
        let month = int(1, "Month")?;
        let day = int(2, "Day")?;
        let date = i32::try_from(year)
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, month, day))
            .ok_or_else(|| LogError::InvalidDate(format!("{}-{}-{}", year, month, day)))?;

        let mut totals = EnergyTotals::default();
        let mut col = DATE_COLUMNS;
        for source in Source::ALL {
            for sink in Sink::ALL {
                let kwh: f64 = record[col].trim().parse().map_err(|_| LogError::MalformedField {
                    field: "energy",
                    reason: format!("'{}' in column {} is not a number", &record[col], col),
                })?;
                totals.set(source, sink, kwh);
                col += 1;
            }
        }

        let soc_range = if record.len() >= FULL_COLUMNS {
            let min = int(MIN_COLUMNS, "SoC Min")?;
            let max = int(MIN_COLUMNS + 1, "SoC Max")?;
            (min.min(u32::from(u16::MAX)) as u16, max.min(u32::from(u16::MAX)) as u16)
        } else {
            (0, 0)
        };

        Ok(Self {
            date,
            totals,
            soc_range,
        })
    }
}

/// Append a day to the summary file, creating it with a header if missing
pub fn append_daily(path: &Path, row: &DailySummaryRow) -> Result<()> {
    let exists = path.exists();
    if !exists {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if !exists {
        writer.write_record(summary_header())?;
    }
    writer.write_record(row.to_record())?;
    writer.flush()?;
    log::info!("Appended {} to {:?}", row.date, path);
    Ok(())
}

/// Read every day of a summary file
///
/// Rows with fewer than fifteen columns, or that fail to parse, are skipped.
pub fn load_monthly(path: &Path) -> Result<Vec<DailySummaryRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() < MIN_COLUMNS {
            log::debug!("Skipping short summary row {} ({} columns)", line + 2, record.len());
            continue;
        }
        match DailySummaryRow::from_record(&record) {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!("Skipping summary row {}: {}", line + 2, e),
        }
    }
    Ok(rows)
}

/// Totals over the days of a month
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyTotals {
    pub days: usize,
    pub totals: EnergyTotals,
}

impl MonthlyTotals {
    pub fn from_rows(rows: &[DailySummaryRow]) -> Self {
        let mut month = Self::default();
        for row in rows {
            month.totals.accumulate(&row.totals);
            month.days += 1;
        }
        month
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn row(day: u32, solar_house: f64, soc: (u16, u16)) -> DailySummaryRow {
        let mut totals = EnergyTotals::default();
        totals.set(Source::Solar, Sink::House, solar_house);
        totals.set(Source::Grid, Sink::InverterResidual, 0.25);
        DailySummaryRow {
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            totals,
            soc_range: soc,
        }
    }

    #[test]
    fn test_header() {
        let header = summary_header();
        assert_eq!(header.len(), FULL_COLUMNS);
        assert_eq!(header[3], "Solar to House");
        assert_eq!(header[4], "Solar to Inverter");
        assert_eq!(header[14], "Grid to Grid");
        assert_eq!(header[16], "SoC Max");
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024/06/Solis_Monthly_202406.csv");
        append_daily(&path, &row(1, 3.5, (20, 90))).unwrap();
        append_daily(&path, &row(2, 4.0, (15, 100))).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Year,Month,Day,Solar to House"));
        assert!(lines[1].starts_with("2024,6,1,3.500,0.000"));
        assert!(lines[2].ends_with(",15,100"));
    }

    #[test]
    fn test_written_rows_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        append_daily(&path, &row(9, 1.234, (40, 80))).unwrap();

        let rows = load_monthly(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());
        assert_eq!(rows[0].totals.get(Source::Solar, Sink::House), 1.234);
        assert_eq!(rows[0].totals.get(Source::Grid, Sink::InverterResidual), 0.25);
        assert_eq!(rows[0].soc_range, (40, 80));
    }

    #[test]
    fn test_legacy_rows_without_soc() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Year,Month,Day,a,b,c,d,e,f,g,h,i,j,k,l").unwrap();
        writeln!(file, "2023,5,1,1.0,0,0,0,0,0,0,0,0,0,0,2.5").unwrap();
        writeln!(file, "2023,5,2,short,row").unwrap();
        writeln!(file, "2023,5,3,x,0,0,0,0,0,0,0,0,0,0,0").unwrap();
        file.flush().unwrap();

        let rows = load_monthly(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].soc_range, (0, 0));
        assert_eq!(rows[0].totals.get(Source::Grid, Sink::Grid), 2.5);
    }

    #[test]
    fn test_monthly_totals() {
        let rows = vec![row(1, 1.0, (0, 0)), row(2, 2.5, (0, 0))];
        let month = MonthlyTotals::from_rows(&rows);
        assert_eq!(month.days, 2);
        assert_eq!(month.totals.get(Source::Solar, Sink::House), 3.5);
        assert_eq!(month.totals.consumed_from(Source::Grid), 0.5);
    }
}
