//! Configuration loading and parsing
//!
//! Every section of the TOML file is optional; missing values fall back to
//! the deployed defaults. Command-line flags override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solis_log::{LogConfig, PollConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from solis.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub inverter: InverterConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    LogConfig::default().data_dir
}

fn default_report_dir() -> PathBuf {
    LogConfig::default().report_dir
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            report_dir: default_report_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Gap between samples (seconds) at which a link is shown as stale
    #[serde(default = "default_stale_gap")]
    pub stale_gap_secs: u64,
}

fn default_stale_gap() -> u64 {
    LogConfig::default().stale_gap_secs
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            stale_gap_secs: default_stale_gap(),
        }
    }
}

/// Data logger endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InverterConfig {
    pub address: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
}

fn default_port() -> u16 {
    30003
}

fn default_slave_id() -> u8 {
    1
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_port(),
            slave_id: default_slave_id(),
        }
    }
}

impl AppConfig {
    /// Library configuration for reading logs and writing reports
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new()
            .with_data_dir(&self.paths.data_dir)
            .with_report_dir(&self.paths.report_dir)
            .with_stale_gap(self.report.stale_gap_secs)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
