//! Log segment access
//!
//! A segment is one append-only file of fixed-length records in a single
//! format. This module locates the first record at or after a requested time
//! with an interpolation search and then streams the remaining records in
//! file order.
//!
//! Malformed records are skipped, never fatal. A partial record at the end of
//! the file (e.g. one still being appended) is treated as end of data.

use crate::formats::RecordFormat;
use crate::types::{Result, Sample, Timestamp};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Maximum distance from an undecodable probe slot at which the search
/// retries before falling back to a linear scan of the remaining window
const PROBE_WINDOW: u64 = 8;

/// Read one fixed-length record from the current position
///
/// Returns `Ok(None)` if fewer than `len` bytes remain.
pub fn read_record<R: Read>(reader: &mut R, len: usize) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(len);
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}

/// Iterator over raw fixed-length records of a byte stream
pub struct RecordChunks<R> {
    reader: R,
    len: usize,
    done: bool,
}

impl<R: Read> RecordChunks<R> {
    pub fn new(reader: R, len: usize) -> Self {
        Self {
            reader,
            len,
            done: false,
        }
    }
}

impl<R: Read> Iterator for RecordChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_record(&mut self.reader, self.len) {
            Ok(Some(raw)) => Some(Ok(raw)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One log file of a single record format
pub struct LogSegment<R> {
    reader: R,
    format: RecordFormat,
    slots: u64,
}

impl LogSegment<BufReader<File>> {
    /// Open a segment file
    ///
    /// # Returns
    /// * `Ok(None)` - the file does not exist (no data for this format)
    /// * `Ok(Some(segment))` - the segment, ready for searching
    pub fn open(path: &Path, format: RecordFormat) -> Result<Option<Self>> {
        match File::open(path) {
            Ok(file) => {
                let segment = Self::new(BufReader::new(file), format)?;
                log::debug!(
                    "Opened {} segment {:?} with {} records",
                    format,
                    path,
                    segment.slot_count()
                );
                Ok(Some(segment))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No {} segment at {:?}", format, path);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read + Seek> LogSegment<R> {
    /// Wrap a reader holding records of `format`
    pub fn new(mut reader: R, format: RecordFormat) -> Result<Self> {
        let bytes = reader.seek(SeekFrom::End(0))?;
        let slots = bytes / format.record_len() as u64;
        Ok(Self {
            reader,
            format,
            slots,
        })
    }

    /// Number of complete records in the segment when it was opened
    pub fn slot_count(&self) -> u64 {
        self.slots
    }

    /// Decode the record in `slot`
    ///
    /// Returns `Ok(None)` if the slot is past the end or fails to decode.
    pub fn read_slot(&mut self, slot: u64) -> Result<Option<Sample>> {
        let len = self.format.record_len();
        self.reader.seek(SeekFrom::Start(slot * len as u64))?;
        let Some(raw) = read_record(&mut self.reader, len)? else {
            return Ok(None);
        };
        match self.format.decode(&raw) {
            Ok(sample) => Ok(Some(sample)),
            Err(e) => {
                log::warn!("Skipping {} record in slot {}: {}", self.format, slot, e);
                Ok(None)
            }
        }
    }

    /// Find the first record with timestamp ≥ `t`
    ///
    /// # Returns
    /// * `Ok(None)` - every record in the segment is older than `t`
    /// * `Ok(Some((sample, cursor)))` - the first matching sample and a cursor
    ///   positioned on the record after it
    pub fn find_first(mut self, t: Timestamp) -> Result<Option<(Sample, SegmentCursor<R>)>> {
        let Some(slot) = self.search(t)? else {
            return Ok(None);
        };
        match self.read_slot(slot)? {
            Some(sample) => {
                let cursor = self.into_cursor(slot + 1)?;
                Ok(Some((sample, cursor)))
            }
            None => Ok(None),
        }
    }

    /// Stream every sample with timestamp ≥ `t`, in file order
    pub fn samples_since(self, t: Timestamp) -> Result<SegmentCursor<R>> {
        let format = self.format;
        match self.find_first(t)? {
            Some((sample, mut cursor)) => {
                cursor.pending = Some(sample);
                Ok(cursor)
            }
            None => Ok(SegmentCursor::exhausted(format)),
        }
    }

    /// Stream every sample in the segment
    pub fn samples(self) -> Result<SegmentCursor<R>> {
        self.into_cursor(0)
    }

    fn into_cursor(mut self, slot: u64) -> Result<SegmentCursor<R>> {
        let len = self.format.record_len();
        self.reader.seek(SeekFrom::Start(slot * len as u64))?;
        Ok(SegmentCursor {
            format: self.format,
            chunks: Some(RecordChunks::new(self.reader, len)),
            slot,
            pending: None,
        })
    }

    /// Slot index of the first record with timestamp ≥ `t`
    fn search(&mut self, t: Timestamp) -> Result<Option<u64>> {
        let Some((mut lo, mut d_lo)) = self.scan_forward(0, self.slots)? else {
            log::debug!("{} segment has no decodable records", self.format);
            return Ok(None);
        };
        let (mut hi, mut d_hi) = match self.scan_backward(lo, self.slots)? {
            Some(found) => found,
            None => (lo, d_lo),
        };

        if d_hi.timestamp < t {
            return Ok(None);
        }
        if d_lo.timestamp >= t {
            return Ok(Some(lo));
        }

        // d_lo.timestamp < t <= d_hi.timestamp
        while hi - lo > 1 {
            let mid = estimate(lo, d_lo.timestamp, hi, d_hi.timestamp, t);
            log::trace!("Probe slot {} in ({}, {})", mid, lo, hi);
            match self.probe_near(mid, lo, hi)? {
                Some((slot, sample)) if sample.timestamp < t => {
                    lo = slot;
                    d_lo = sample;
                }
                Some((slot, sample)) => {
                    hi = slot;
                    d_hi = sample;
                }
                None => return self.linear_between(lo, hi, t),
            }
        }
        Ok(Some(hi))
    }

    /// Decodable slot closest to `mid` strictly inside `(lo, hi)`
    fn probe_near(&mut self, mid: u64, lo: u64, hi: u64) -> Result<Option<(u64, Sample)>> {
        if let Some(sample) = self.read_slot(mid)? {
            return Ok(Some((mid, sample)));
        }
        for step in 1..=PROBE_WINDOW {
            let above = mid + step;
            if above < hi {
                if let Some(sample) = self.read_slot(above)? {
                    return Ok(Some((above, sample)));
                }
            }
            if let Some(below) = mid.checked_sub(step).filter(|&s| s > lo) {
                if let Some(sample) = self.read_slot(below)? {
                    return Ok(Some((below, sample)));
                }
            }
        }
        Ok(None)
    }

    fn linear_between(&mut self, lo: u64, hi: u64, t: Timestamp) -> Result<Option<u64>> {
        log::debug!("Falling back to linear scan of slots ({}, {})", lo, hi);
        for slot in lo + 1..hi {
            if let Some(sample) = self.read_slot(slot)? {
                if sample.timestamp >= t {
                    return Ok(Some(slot));
                }
            }
        }
        Ok(Some(hi))
    }

    fn scan_forward(&mut self, from: u64, to: u64) -> Result<Option<(u64, Sample)>> {
        for slot in from..to {
            if let Some(sample) = self.read_slot(slot)? {
                return Ok(Some((slot, sample)));
            }
        }
        Ok(None)
    }

    fn scan_backward(&mut self, floor: u64, to: u64) -> Result<Option<(u64, Sample)>> {
        for slot in (floor..to).rev() {
            if let Some(sample) = self.read_slot(slot)? {
                return Ok(Some((slot, sample)));
            }
        }
        Ok(None)
    }
}

/// Linear estimate of the slot holding `t`, strictly inside `(lo, hi)`
///
/// Requires `hi - lo >= 2`. Falls back to the midpoint when the bounding
/// timestamps do not increase.
fn estimate(lo: u64, t_lo: Timestamp, hi: u64, t_hi: Timestamp, t: Timestamp) -> u64 {
    let guess = if t_hi > t_lo {
        let span = u128::from(t_hi - t_lo);
        let offset = u128::from(t.saturating_sub(t_lo));
        let width = u128::from(hi - lo);
        lo + (width * offset / span) as u64
    } else {
        lo + (hi - lo) / 2
    };
    guess.clamp(lo + 1, hi - 1)
}

/// Sequential reader over the records of a segment
///
/// Yields decoded samples in file order. Records that fail to decode are
/// skipped; a short tail ends the iteration.
pub struct SegmentCursor<R> {
    format: RecordFormat,
    chunks: Option<RecordChunks<R>>,
    slot: u64,
    pending: Option<Sample>,
}

impl<R> SegmentCursor<R> {
    fn exhausted(format: RecordFormat) -> Self {
        Self {
            format,
            chunks: None,
            slot: 0,
            pending: None,
        }
    }
}

impl<R: Read> Iterator for SegmentCursor<R> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(sample) = self.pending.take() {
            return Some(Ok(sample));
        }
        let chunks = self.chunks.as_mut()?;
        loop {
            let raw = match chunks.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e.into())),
            };
            let slot = self.slot;
            self.slot += 1;
            match self.format.decode(&raw) {
                Ok(sample) => return Some(Ok(sample)),
                Err(e) => log::warn!("Skipping {} record in slot {}: {}", self.format, slot, e),
            }
        }
    }
}

/// Append one framed record to a segment file, creating it if needed
pub fn append_record(path: &Path, format: RecordFormat, raw: &[u8]) -> Result<()> {
    format.check_frame(raw)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(raw)?;
    log::debug!("Appended {} record to {:?}", format, path);
    Ok(())
}

/// Open a segment and stream its samples from `t`, treating a missing file as empty
pub fn read_segment_since(
    path: &Path,
    format: RecordFormat,
    t: Timestamp,
) -> Result<Option<SegmentCursor<BufReader<File>>>> {
    match LogSegment::open(path, format)? {
        Some(segment) => Ok(Some(segment.samples_since(t)?)),
        None => Ok(None),
    }
}
