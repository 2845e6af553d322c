//! Helpers for integration tests

#![allow(dead_code)]

use solis_log::{Sample, Timestamp};

pub use solis_log::testutil::{cloud_record, modbus_record};

/// Route library log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic pseudo-random sequence (64-bit LCG)
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_below(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

/// Strictly increasing timestamps starting at `start` with gaps in `1..=max_gap`
pub fn increasing_timestamps(rng: &mut Lcg, start: Timestamp, count: usize, max_gap: u64) -> Vec<Timestamp> {
    let mut t = start;
    (0..count)
        .map(|_| {
            t += 1 + rng.next_below(max_gap);
            t
        })
        .collect()
}

/// Sample with only a timestamp and a tag carried in the load field
pub fn tagged(ts: Timestamp, tag: i64) -> Sample {
    Sample::new(ts, 0, tag, 0, 0, 0)
}
