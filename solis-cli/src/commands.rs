//! Subcommand implementations
//!
//! Thin wrappers that resolve arguments against the configuration, call into
//! `solis_log` and format the results.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use solis_log::layout::{day_start, utc_date};
use solis_log::query::{write_query, CSV_CONTENT_HEADER};
use solis_log::segment::RecordChunks;
use solis_log::summary::{load_monthly, MonthlyTotals};
use solis_log::{process_day, LogConfig, LogLayout, Poller, Sink, Source, Timestamp, SOLIS_REGISTERS};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::AppConfig;
use crate::modbus::ModbusTcpTransport;

/// Parameters the CGI gateway passes in `QUERY_STRING`
#[derive(Debug, Default, Deserialize)]
struct CgiQuery {
    #[serde(rename = "From")]
    from: Option<String>,
}

/// Resolve a requested time
///
/// Accepts epoch seconds, `YYYY-MM-DD-HH-MM` (UTC) or `today` (00:00 UTC of
/// the current day).
pub fn parse_time(input: &str, now: DateTime<Utc>) -> Result<Timestamp> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("today") {
        return Ok(day_start(now.date_naive())?);
    }
    if let Ok(secs) = input.parse::<Timestamp>() {
        return Ok(secs);
    }
    let dt = NaiveDateTime::parse_from_str(input, "%Y-%m-%d-%H-%M")
        .with_context(|| format!("Invalid time '{}': expected epoch seconds, YYYY-MM-DD-HH-MM or 'today'", input))?;
    Timestamp::try_from(dt.and_utc().timestamp()).with_context(|| format!("Time '{}' is before 1970", input))
}

/// Parse a `YYYY-MM-DD` date, defaulting to yesterday (UTC)
pub fn parse_date(arg: Option<&str>, now: DateTime<Utc>) -> Result<NaiveDate> {
    match arg {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", s)),
        None => Ok((now - ChronoDuration::days(1)).date_naive()),
    }
}

/// Parse a `YYYY-MM` month into its first day, defaulting to the month of yesterday (UTC)
pub fn parse_month(arg: Option<&str>, now: DateTime<Utc>) -> Result<NaiveDate> {
    match arg {
        Some(s) => NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .with_context(|| format!("Invalid month '{}': expected YYYY-MM", s)),
        None => {
            let day = (now - ChronoDuration::days(1)).date_naive();
            NaiveDate::from_ymd_opt(day.year(), day.month(), 1).context("Invalid current month")
        }
    }
}

fn cgi_from() -> Result<Option<String>> {
    let query = std::env::var("QUERY_STRING").unwrap_or_default();
    let params: CgiQuery = serde_qs::from_str(&query)
        .with_context(|| format!("Invalid QUERY_STRING: {:?}", query))?;
    Ok(params.from)
}

/// Start time and day of a query; `--from` falls back to the CGI parameter, then to today
fn resolve_query(
    from: Option<&str>,
    date: Option<&str>,
    cgi: bool,
    now: DateTime<Utc>,
) -> Result<(Timestamp, NaiveDate)> {
    let requested = match from {
        Some(s) => Some(s.to_string()),
        None if cgi => cgi_from()?,
        None => None,
    };
    let t = match requested {
        Some(s) => parse_time(&s, now)?,
        None => day_start(now.date_naive())?,
    };
    let date = match date {
        Some(d) => parse_date(Some(d), now)?,
        None => utc_date(t)?,
    };
    Ok((t, date))
}

/// `query`: stream samples from a time onward as CSV on stdout
pub fn run_query(config: &LogConfig, from: Option<&str>, date: Option<&str>, cgi: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let (t, date) = match resolve_query(from, date, cgi, Utc::now()) {
        Ok(v) => v,
        Err(e) => {
            if cgi {
                out.write_all(CSV_CONTENT_HEADER.as_bytes())?;
                out.flush()?;
            }
            return Err(e);
        }
    };

    log::debug!("Query {} from {}", date, t);
    let layout = LogLayout::from_config(config);
    let summary = write_query(&layout, date, t, &mut out, cgi)
        .with_context(|| format!("Query of {} failed", date))?;
    out.flush()?;
    log::info!("{} rows for {}", summary.rows, date);
    Ok(())
}

/// `daily`: allocate one day, append it to the monthly summary and optionally write the chart series
pub fn run_daily(config: &LogConfig, date: Option<&str>, series: bool) -> Result<()> {
    let date = parse_date(date, Utc::now())?;
    let (report, summary_path) =
        process_day(config, date).with_context(|| format!("Daily report for {} failed", date))?;

    let totals = &report.energy.totals;
    println!("{}: {} samples", date, report.energy.samples);
    for source in Source::ALL {
        let cells: Vec<String> = Sink::ALL
            .iter()
            .map(|&sink| format!("{} {:6.3}", sink.label(), totals.get(source, sink)))
            .collect();
        println!("  {:8} {}", source.label(), cells.join("  "));
    }
    println!("  SoC {}% - {}%", report.energy.soc_range.0, report.energy.soc_range.1);
    log::info!("Summary appended to {:?}", summary_path);

    if series {
        let path = LogLayout::from_config(config).power_series_path(date);
        write_series(&path, &report.series)?;
        log::info!("Chart series written to {:?}", path);
    }
    Ok(())
}

fn write_series(path: &Path, series: &solis_log::PowerSeries) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, series).context("Failed to serialize chart series")?;
    writer.flush()?;
    Ok(())
}

/// `month`: print the totals of a monthly summary file
pub fn run_month(config: &LogConfig, month: Option<&str>) -> Result<()> {
    let first = parse_month(month, Utc::now())?;
    let path = LogLayout::from_config(config).monthly_summary_path(first);
    let rows = load_monthly(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let month = MonthlyTotals::from_rows(&rows);
    let totals = &month.totals;

    println!("{} ({} days)", first.format("%B %Y"), month.days);
    println!("Consumption by source (kWh):");
    for source in Source::ALL {
        println!("  {:8} {:8.3}", source.label(), totals.consumed_from(source));
    }
    println!("Solar production by sink (kWh):");
    for sink in Sink::ALL {
        println!("  {:8} {:8.3}", sink.label(), totals.get(Source::Solar, sink));
    }
    println!("Grid supply by sink (kWh):");
    for sink in Sink::ALL {
        println!("  {:8} {:8.3}", sink.label(), totals.get(Source::Grid, sink));
    }
    println!("State of charge by day:");
    for row in &rows {
        println!("  {:2}  {:3}% - {:3}%", row.date.day(), row.soc_range.0, row.soc_range.1);
    }
    Ok(())
}

/// `dump`: decode every register of a format A log into CSV
///
/// Stops with an error at the first record that fails to decode.
pub fn run_dump(input: &Path, output: Option<&Path>) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open log {:?}", input))?;
    let out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let records = dump_records(BufReader::new(file), out)?;
    log::info!("Dumped {} records from {:?}", records, input);
    Ok(())
}

/// Write the quoted header and one CSV row per record; returns the record count
pub fn dump_records<R: io::Read, W: Write>(input: R, out: W) -> Result<usize> {
    let mut header = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(out);
    header.write_record(SOLIS_REGISTERS.labels())?;
    let out = header.into_inner().map_err(|e| e.into_error())?;

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    let mut count = 0;
    for (idx, raw) in RecordChunks::new(input, SOLIS_REGISTERS.record_len()).enumerate() {
        let raw = raw.context("Failed to read log")?;
        let row = SOLIS_REGISTERS
            .decode_row(&raw)
            .with_context(|| format!("Invalid record {}", idx))?;
        writer.write_record(&row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// `poll`: read the inverter once and append the record to today's segment
pub fn run_poll(app: &AppConfig, address: Option<&str>) -> Result<()> {
    let Some(host) = address.or(app.inverter.address.as_deref()) else {
        bail!("No inverter address: pass --address or set [inverter] address");
    };
    let transport = ModbusTcpTransport::new(
        host,
        app.inverter.port,
        app.inverter.slave_id,
        app.poll.read_timeout(),
    );
    let mut poller = Poller::new(transport, app.poll);
    let layout = LogLayout::from_config(&app.log_config());
    let path = poller
        .poll_and_append(&layout)
        .with_context(|| format!("Poll of {}:{} failed", host, app.inverter.port))?;
    log::info!("Appended record to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solis_log::formats::modbus;
    use std::io::Cursor;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1700000000", now()).unwrap(), 1_700_000_000);
        assert_eq!(parse_time("today", now()).unwrap(), 1_699_920_000);
        assert_eq!(parse_time("2023-11-14-22-13", now()).unwrap(), 1_699_999_980);
        assert!(parse_time("yesterday", now()).is_err());
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_date(None, now()).unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 13).unwrap()
        );
        assert_eq!(
            parse_date(Some("2024-02-29"), now()).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_date(Some("2023-02-29"), now()).is_err());
        assert_eq!(
            parse_month(Some("2024-06"), now()).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        assert_eq!(
            parse_month(None, now()).unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 1).unwrap()
        );
    }

    #[test]
    fn test_cgi_query_string() {
        let params: CgiQuery = serde_qs::from_str("From=1700000000").unwrap();
        assert_eq!(params.from.as_deref(), Some("1700000000"));
        let params: CgiQuery = serde_qs::from_str("").unwrap();
        assert!(params.from.is_none());
    }

    fn frame(t: u64) -> Vec<u8> {
        let mut words = [0u16; modbus::WORD_COUNT];
        words[..6].copy_from_slice(&[23, 11, 14, 22, 13, 20]);
        modbus::encode_frame(t, &words, t + 5).unwrap()
    }

    #[test]
    fn test_dump_header_and_rows() {
        let mut input = frame(1_700_000_000);
        input.extend(frame(1_700_000_060));
        input.extend_from_slice(&[0xAA, 0x55, 0x00]);

        let mut out = Vec::new();
        let count = dump_records(Cursor::new(input), &mut out).unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("\"Data time\",\"System Time\",\"Total Generation (kWh)\""));
        assert!(lines[0].contains("\"Battery Current Direction (0=Charging, 1=Discharging)\""));
        assert!(lines[1].starts_with("2023-11-14 22:13:20,2023-11-14 22:13:20,0,"));
        assert!(lines[2].ends_with(",2023-11-14 22:14:25"));
    }

    #[test]
    fn test_dump_stops_on_bad_magic() {
        let mut bad = frame(1);
        bad[0] = 0;
        let mut out = Vec::new();
        let err = dump_records(Cursor::new(bad), &mut out).unwrap_err();
        assert!(err.to_string().contains("Invalid record 0"));
    }
}
