//! Register poller
//!
//! One poll cycle connects to the inverter, reads every range of
//! [`REGISTER_RANGES`] in order and frames the words into a format A record
//! stamped with the cycle's start and end times.
//!
//! Retry policy:
//! - a timed-out range read is retried up to `read_attempts` times; if it
//!   still times out the poll fails with [`LogError::ReadTimeout`]
//! - a connection reset (on connect or on any read) closes the link, waits
//!   `reset_backoff_secs` and restarts the whole cycle, up to
//!   `cycle_attempts` cycles, after which the poll fails with
//!   [`LogError::PollFailed`]
//!
//! A record is only produced by a complete cycle.

use crate::config::PollConfig;
use crate::formats::modbus::{self, REGISTER_RANGES};
use crate::formats::RecordFormat;
use crate::layout::{utc_date, LogLayout};
use crate::segment::append_record;
use crate::types::{LogError, Result, Timestamp};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Failure reported by a register transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection reset by peer")]
    Reset,

    #[error("{0}")]
    Other(String),
}

/// Link to the inverter's input registers
pub trait RegisterTransport {
    /// Open the connection
    fn connect(&mut self) -> std::result::Result<(), TransportError>;

    /// Read `count` input registers starting at `first`
    fn read_input_registers(
        &mut self,
        first: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, TransportError>;

    /// Drop the connection; a no-op if not connected
    fn close(&mut self);
}

/// Time source of the poller
pub trait Clock {
    fn now(&self) -> Timestamp;
    fn sleep(&self, duration: Duration);
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How a single cycle ended without a record
enum CycleError {
    /// Connection reset; `None` while connecting, else the range being read
    Reset(Option<(u16, u16)>),
    /// Unrecoverable for this poll
    Fatal(LogError),
}

/// Polls the inverter and builds format A records
pub struct Poller<T, C = SystemClock> {
    transport: T,
    config: PollConfig,
    clock: C,
}

impl<T: RegisterTransport> Poller<T, SystemClock> {
    pub fn new(transport: T, config: PollConfig) -> Self {
        Self::with_clock(transport, config, SystemClock)
    }
}

impl<T: RegisterTransport, C: Clock> Poller<T, C> {
    pub fn with_clock(transport: T, config: PollConfig, clock: C) -> Self {
        Self {
            transport,
            config,
            clock,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run poll cycles until one completes or the retry budget is spent
    ///
    /// # Returns
    /// * `Ok(record)` - a framed 306-byte format A record
    /// * `Err(ReadTimeout)` - a range kept timing out
    /// * `Err(PollFailed)` - every cycle ended in a connection reset
    pub fn poll_once(&mut self) -> Result<Vec<u8>> {
        let cycles = self.config.cycle_attempts.max(1);
        for cycle in 1..=cycles {
            let start = self.clock.now();
            let outcome = self.read_cycle();
            self.transport.close();
            match outcome {
                Ok(words) => {
                    let end = self.clock.now();
                    log::debug!("Poll cycle {} read {} registers", cycle, words.len());
                    return modbus::encode_frame(start, &words, end);
                }
                Err(CycleError::Fatal(e)) => return Err(e),
                Err(CycleError::Reset(None)) => {
                    log::warn!("Try {} - Connection reset on open", cycle);
                }
                Err(CycleError::Reset(Some((first, last)))) => {
                    log::warn!(
                        "Try {} - Connection reset reading registers ({}, {})",
                        cycle,
                        first,
                        last
                    );
                }
            }
            if cycle < cycles {
                self.clock.sleep(self.config.reset_backoff());
            }
        }
        Err(LogError::PollFailed { attempts: cycles })
    }

    fn read_cycle(&mut self) -> std::result::Result<Vec<u16>, CycleError> {
        match self.transport.connect() {
            Ok(()) => {}
            Err(TransportError::Reset) => return Err(CycleError::Reset(None)),
            Err(e) => return Err(CycleError::Fatal(LogError::Transport(format!("connect: {}", e)))),
        }

        let mut words = Vec::with_capacity(modbus::WORD_COUNT);
        for (first, last) in REGISTER_RANGES {
            words.extend(self.read_range(first, last)?);
        }
        Ok(words)
    }

    fn read_range(&mut self, first: u16, last: u16) -> std::result::Result<Vec<u16>, CycleError> {
        let count = last - first;
        let attempts = self.config.read_attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.read_input_registers(first, count) {
                Ok(values) if values.len() == usize::from(count) => return Ok(values),
                Ok(values) => {
                    return Err(CycleError::Fatal(LogError::MalformedField {
                        field: "register response",
                        reason: format!(
                            "range ({}, {}) returned {} words, expected {}",
                            first,
                            last,
                            values.len(),
                            count
                        ),
                    }))
                }
                Err(TransportError::Timeout) => {
                    log::debug!("Timeout reading ({}, {}), attempt {}/{}", first, last, attempt, attempts);
                }
                Err(TransportError::Reset) => return Err(CycleError::Reset(Some((first, last)))),
                Err(TransportError::Other(msg)) => {
                    return Err(CycleError::Fatal(LogError::Transport(msg)))
                }
            }
        }
        log::error!("Failed to read registers ({}, {})", first, last);
        Err(CycleError::Fatal(LogError::ReadTimeout { first, last }))
    }

    /// Poll once and append the record to the day's format A segment
    ///
    /// The day is the UTC date of the poll end time.
    pub fn poll_and_append(&mut self, layout: &LogLayout) -> Result<PathBuf> {
        let record = self.poll_once()?;
        let end = modbus::end_time(&record)?;
        let path = layout.segment_path(RecordFormat::Modbus, utc_date(end)?);
        append_record(&path, RecordFormat::Modbus, &record)?;
        log::info!("Logged poll at {} to {:?}", end, path);
        Ok(path)
    }
}
