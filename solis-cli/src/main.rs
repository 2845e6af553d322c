//! Solis Log CLI Application
//!
//! Command-line front end for the solis-log library:
//! - `query`: samples from a given time onward as CSV (optionally as a CGI response)
//! - `daily`: energy allocation for one day, appended to the monthly summary
//! - `month`: totals of a monthly summary
//! - `dump`: strict full register dump of a Modbus log
//! - `poll`: read the inverter once and log the record

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod modbus;

use config::AppConfig;

/// Solis Log - Capture, query and report inverter power logs
#[derive(Parser, Debug)]
#[command(name = "solis")]
#[command(about = "Query and report Solis inverter power logs", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (solis.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the YYYY/MM segment tree (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for summaries and chart series (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    report_dir: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream samples from a time onward as CSV
    Query {
        /// Start time: epoch seconds, YYYY-MM-DD-HH-MM or "today"
        #[arg(long)]
        from: Option<String>,

        /// Day to read (YYYY-MM-DD); defaults to the day of --from
        #[arg(long)]
        date: Option<String>,

        /// Emit a CGI response; --from defaults to QUERY_STRING "From="
        #[arg(long)]
        cgi: bool,
    },

    /// Allocate one day's energy and append it to the monthly summary
    Daily {
        /// Day to process (YYYY-MM-DD); defaults to yesterday (UTC)
        date: Option<String>,

        /// Also write the chart series as JSON
        #[arg(long)]
        series: bool,
    },

    /// Print the totals of a monthly summary
    Month {
        /// Month (YYYY-MM); defaults to the month of yesterday (UTC)
        month: Option<String>,
    },

    /// Decode every register of a Modbus log into CSV
    Dump {
        /// Modbus capture log (.dat)
        input: PathBuf,

        /// Output CSV file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Poll the inverter once and append the record to the day's log
    Poll {
        /// Data logger host name or IP (overrides config)
        #[arg(long)]
        address: Option<String>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::debug!("Solis Log CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using solis-log library v{}", solis_log::VERSION);

    let mut app = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        app.paths.data_dir = dir.clone();
    }
    if let Some(dir) = &args.report_dir {
        app.paths.report_dir = dir.clone();
    }
    let log_config = app.log_config();

    match &args.command {
        Command::Query { from, date, cgi } => {
            commands::run_query(&log_config, from.as_deref(), date.as_deref(), *cgi)
        }
        Command::Daily { date, series } => commands::run_daily(&log_config, date.as_deref(), *series),
        Command::Month { month } => commands::run_month(&log_config, month.as_deref()),
        Command::Dump { input, output } => commands::run_dump(input, output.as_deref()),
        Command::Poll { address } => commands::run_poll(&app, address.as_deref()),
    }
}

/// Initialize logging based on verbosity level
///
/// Logs go to stderr so CSV on stdout stays clean.
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
