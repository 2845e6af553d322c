//! Library configuration types
//!
//! Where log segments and reports live, the status classification threshold
//! and the poller's retry policy. Everything has a default matching the
//! deployed capture setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for reading logs and writing reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Root of the `YYYY/MM` tree holding the binary segments
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the `YYYY/MM` tree holding summaries and chart series
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// A gap of this many seconds or more between samples marks the link stale
    #[serde(default = "default_stale_gap")]
    pub stale_gap_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("html")
}

fn default_stale_gap() -> u64 {
    400
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            report_dir: default_report_dir(),
            stale_gap_secs: default_stale_gap(),
        }
    }
}

impl LogConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the segment directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Builder method: set the report directory
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Builder method: set the stale gap threshold
    pub fn with_stale_gap(mut self, secs: u64) -> Self {
        self.stale_gap_secs = secs;
        self
    }
}

/// Retry policy of the register poller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollConfig {
    /// Tries per register range before a timeout fails the poll
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,

    /// Full poll cycles attempted when the connection keeps resetting
    #[serde(default = "default_cycle_attempts")]
    pub cycle_attempts: u32,

    /// Wait after a connection reset before the next cycle
    #[serde(default = "default_reset_backoff")]
    pub reset_backoff_secs: u64,

    /// Per-request network timeout
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_read_attempts() -> u32 {
    3
}

fn default_cycle_attempts() -> u32 {
    2
}

fn default_reset_backoff() -> u64 {
    120
}

fn default_read_timeout() -> u64 {
    20
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            read_attempts: default_read_attempts(),
            cycle_attempts: default_cycle_attempts(),
            reset_backoff_secs: default_reset_backoff(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts;
        self
    }

    pub fn with_cycle_attempts(mut self, attempts: u32) -> Self {
        self.cycle_attempts = attempts;
        self
    }

    pub fn with_reset_backoff(mut self, secs: u64) -> Self {
        self.reset_backoff_secs = secs;
        self
    }

    pub fn with_read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    pub fn reset_backoff(&self) -> Duration {
        Duration::from_secs(self.reset_backoff_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
