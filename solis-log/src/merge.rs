//! Time-ordered merge of sample streams
//!
//! Combines several per-format sample streams, each already in
//! non-decreasing timestamp order, into one stream ordered by timestamp.

use crate::types::{Result, Sample, Timestamp};
use std::iter::Peekable;

/// K-way merge over sample streams
///
/// At each step the input whose head has the smallest timestamp is advanced.
/// Ties go to the input added first. A read error at any head is passed
/// through before further samples.
pub struct SampleMerger<I: Iterator<Item = Result<Sample>>> {
    inputs: Vec<Peekable<I>>,
    last_seen: Vec<Option<Timestamp>>,
}

impl<I: Iterator<Item = Result<Sample>>> SampleMerger<I> {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            last_seen: Vec::new(),
        }
    }

    /// Add an input stream; returns its index
    pub fn push(&mut self, input: I) -> usize {
        self.inputs.push(input.peekable());
        self.last_seen.push(None);
        self.inputs.len() - 1
    }

    /// Timestamp of the last sample emitted from each input, by index
    pub fn last_timestamps(&self) -> &[Option<Timestamp>] {
        &self.last_seen
    }

    fn select(&mut self) -> Option<usize> {
        let mut best: Option<(usize, Timestamp)> = None;
        for (idx, input) in self.inputs.iter_mut().enumerate() {
            match input.peek() {
                None => continue,
                Some(Err(_)) => return Some(idx),
                Some(Ok(sample)) => {
                    if best.map_or(true, |(_, t)| sample.timestamp < t) {
                        best = Some((idx, sample.timestamp));
                    }
                }
            }
        }
        best.map(|(idx, _)| idx)
    }
}

impl<I: Iterator<Item = Result<Sample>>> Default for SampleMerger<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Iterator<Item = Result<Sample>>> FromIterator<I> for SampleMerger<I> {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        let mut merger = Self::new();
        for input in iter {
            merger.push(input);
        }
        merger
    }
}

impl<I: Iterator<Item = Result<Sample>>> Iterator for SampleMerger<I> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.select()?;
        let item = self.inputs[idx].next()?;
        if let Ok(sample) = &item {
            self.last_seen[idx] = Some(sample.timestamp);
        }
        Some(item)
    }
}
