//! Energy flow allocation
//!
//! Each sample's instantaneous power is split among sources (solar, battery
//! discharge, grid import) and sinks (grid export, battery charge, inverter
//! residual, house load) by a fixed-priority greedy waterfall. Allocations
//! are weighted by the time each sample represents and integrated into a
//! source × sink energy matrix for one reporting period.
//!
//! The same time axis is used to classify link status: gaps of
//! `stale_gap_secs` or more between consecutive samples are stale.

use crate::types::{Sample, Timestamp};
use serde::Serialize;

/// Watt-seconds per kilowatt-hour
const WS_PER_KWH: f64 = 3.6e6;

/// Power producer in the allocation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    Solar,
    Battery,
    Grid,
}

impl Source {
    /// Allocation and report order
    pub const ALL: [Source; 3] = [Source::Solar, Source::Battery, Source::Grid];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Source::Solar => "Solar",
            Source::Battery => "Battery",
            Source::Grid => "Grid",
        }
    }

    /// Power this source supplies in a sample (never negative)
    pub fn supply(self, sample: &Sample) -> i64 {
        match self {
            Source::Solar => sample.solar_w.max(0),
            Source::Battery => (-sample.battery_w).max(0),
            Source::Grid => (-sample.grid_w).max(0),
        }
    }
}

/// Power consumer in the allocation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Sink {
    House,
    InverterResidual,
    Battery,
    Grid,
}

impl Sink {
    /// Report order (monthly summary columns)
    pub const ALL: [Sink; 4] = [Sink::House, Sink::InverterResidual, Sink::Battery, Sink::Grid];

    /// Order in which a source's power is handed out
    pub const PRIORITY: [Sink; 4] = [Sink::Grid, Sink::Battery, Sink::InverterResidual, Sink::House];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Sink::House => "House",
            Sink::InverterResidual => "Inverter",
            Sink::Battery => "Battery",
            Sink::Grid => "Grid",
        }
    }

    /// Power this sink can absorb in a sample
    ///
    /// A negative inverter residual is an unmeasured source, not a sink, and
    /// contributes no capacity.
    pub fn capacity(self, sample: &Sample) -> i64 {
        match self {
            Sink::House => sample.load_w.max(0),
            Sink::InverterResidual => sample.inverter_residual_w.max(0),
            Sink::Battery => sample.battery_w.max(0),
            Sink::Grid => sample.grid_w.max(0),
        }
    }
}

/// Instantaneous power flows of one sample, in watts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    flows: [[i64; 4]; 3],
}

impl Allocation {
    pub fn get(&self, source: Source, sink: Sink) -> i64 {
        self.flows[source.index()][sink.index()]
    }

    /// Total power allocated from `source`
    pub fn from_source(&self, source: Source) -> i64 {
        self.flows[source.index()].iter().sum()
    }

    /// Total power delivered to `sink`
    pub fn to_sink(&self, sink: Sink) -> i64 {
        self.flows.iter().map(|row| row[sink.index()]).sum()
    }

    pub fn total(&self) -> i64 {
        self.flows.iter().flatten().sum()
    }
}

/// Split one sample's power among sinks
///
/// Sources are served in [`Source::ALL`] order. Each walks the sinks in
/// [`Sink::PRIORITY`] order, filling each sink's remaining capacity before
/// moving on, and stops once exhausted.
pub fn allocate(sample: &Sample) -> Allocation {
    let mut capacity = [0i64; 4];
    for sink in Sink::ALL {
        capacity[sink.index()] = sink.capacity(sample);
    }

    let mut alloc = Allocation::default();
    for source in Source::ALL {
        let mut remaining = source.supply(sample);
        if remaining == 0 {
            continue;
        }
        for sink in Sink::PRIORITY {
            let cap = &mut capacity[sink.index()];
            let flow = &mut alloc.flows[source.index()][sink.index()];
            if remaining > *cap {
                *flow += *cap;
                remaining -= *cap;
                *cap = 0;
            } else {
                *flow += remaining;
                *cap -= remaining;
                break;
            }
        }
    }
    alloc
}

/// Cumulative energy per source and sink, in watt-seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyUseMatrix {
    ws: [[f64; 4]; 3],
}

impl EnergyUseMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allocation held for `dt` seconds
    pub fn credit(&mut self, alloc: &Allocation, dt: f64) {
        for (row, flows) in self.ws.iter_mut().zip(alloc.flows.iter()) {
            for (cell, &watts) in row.iter_mut().zip(flows.iter()) {
                *cell += dt * watts as f64;
            }
        }
    }

    pub fn watt_seconds(&self, source: Source, sink: Sink) -> f64 {
        self.ws[source.index()][sink.index()]
    }

    /// Convert to kilowatt-hours
    pub fn finalize(&self) -> EnergyTotals {
        let mut kwh = [[0.0; 4]; 3];
        for (out, row) in kwh.iter_mut().zip(self.ws.iter()) {
            for (o, &ws) in out.iter_mut().zip(row.iter()) {
                *o = ws / WS_PER_KWH;
            }
        }
        EnergyTotals { kwh }
    }
}

/// Energy per source and sink over a period, in kWh
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyTotals {
    kwh: [[f64; 4]; 3],
}

impl EnergyTotals {
    pub fn get(&self, source: Source, sink: Sink) -> f64 {
        self.kwh[source.index()][sink.index()]
    }

    pub fn set(&mut self, source: Source, sink: Sink, kwh: f64) {
        self.kwh[source.index()][sink.index()] = kwh;
    }

    /// Energy from `source` consumed on site (house and inverter)
    pub fn consumed_from(&self, source: Source) -> f64 {
        self.get(source, Sink::House) + self.get(source, Sink::InverterResidual)
    }

    /// Total energy from `source`
    pub fn from_source(&self, source: Source) -> f64 {
        Sink::ALL.iter().map(|&sink| self.get(source, sink)).sum()
    }

    /// Total energy into `sink`
    pub fn to_sink(&self, sink: Sink) -> f64 {
        Source::ALL.iter().map(|&source| self.get(source, sink)).sum()
    }

    /// Values in report order: sources outer, sinks inner
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.kwh.iter().flat_map(|row| row.iter().copied())
    }

    /// Add another period's totals
    pub fn accumulate(&mut self, other: &EnergyTotals) {
        for (row, other_row) in self.kwh.iter_mut().zip(other.kwh.iter()) {
            for (cell, v) in row.iter_mut().zip(other_row.iter()) {
                *cell += v;
            }
        }
    }
}

/// Integrates sample allocations over one reporting period
///
/// Each sample represents the interval between the midpoints to its
/// neighbours; the first sample extends back to the period start and the
/// last forward to the period end. Boundaries are clamped to the period.
#[derive(Debug, Clone)]
pub struct EnergyFlowAllocator {
    period_start: Timestamp,
    period_end: Timestamp,
    matrix: EnergyUseMatrix,
    pending: Option<Sample>,
    boundary: f64,
    samples: usize,
    soc_range: Option<(u16, u16)>,
}

impl EnergyFlowAllocator {
    pub fn new(period_start: Timestamp, period_end: Timestamp) -> Self {
        Self {
            period_start,
            period_end,
            matrix: EnergyUseMatrix::new(),
            pending: None,
            boundary: period_start as f64,
            samples: 0,
            soc_range: None,
        }
    }

    fn clamp(&self, t: f64) -> f64 {
        t.clamp(self.period_start as f64, self.period_end as f64)
    }

    /// Feed the next sample in time order
    pub fn push(&mut self, sample: Sample) {
        if let Some(prev) = self.pending.take() {
            let midpoint = (prev.timestamp as f64 + sample.timestamp as f64) / 2.0;
            let next_boundary = self.clamp(midpoint);
            self.credit(&prev, next_boundary);
        }
        self.soc_range = Some(match self.soc_range {
            Some((lo, hi)) => (lo.min(sample.battery_soc_pct), hi.max(sample.battery_soc_pct)),
            None => (sample.battery_soc_pct, sample.battery_soc_pct),
        });
        self.samples += 1;
        self.pending = Some(sample);
    }

    fn credit(&mut self, sample: &Sample, next_boundary: f64) {
        let dt = (next_boundary - self.boundary).max(0.0);
        self.matrix.credit(&allocate(sample), dt);
        self.boundary = self.boundary.max(next_boundary);
    }

    /// Close the period and return the accumulated energy
    pub fn finish(mut self) -> EnergySummary {
        if let Some(last) = self.pending.take() {
            let end = self.period_end as f64;
            self.credit(&last, end);
        }
        log::debug!(
            "Allocated {} samples over [{}, {})",
            self.samples,
            self.period_start,
            self.period_end
        );
        EnergySummary {
            totals: self.matrix.finalize(),
            samples: self.samples,
            soc_range: self.soc_range.unwrap_or((0, 0)),
        }
    }
}

impl Extend<Sample> for EnergyFlowAllocator {
    fn extend<T: IntoIterator<Item = Sample>>(&mut self, iter: T) {
        for sample in iter {
            self.push(sample);
        }
    }
}

/// Result of allocating one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergySummary {
    pub totals: EnergyTotals,
    pub samples: usize,
    /// Lowest and highest battery state of charge seen, `(0, 0)` if no samples
    pub soc_range: (u16, u16),
}

/// Link state over an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Live,
    Stale,
}

/// A maximal run of one link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusInterval {
    pub start: Timestamp,
    pub end: Timestamp,
    pub state: LinkState,
}

/// Classify the gaps of a time-ordered stream within a period
///
/// The period start, each timestamp and the period end form a chain of
/// points; a gap shorter than `stale_gap_secs` is live, otherwise stale.
/// Adjacent gaps of the same state are merged.
pub fn link_status(
    timestamps: &[Timestamp],
    period_start: Timestamp,
    period_end: Timestamp,
    stale_gap_secs: u64,
) -> Vec<StatusInterval> {
    let mut points = Vec::with_capacity(timestamps.len() + 2);
    points.push(period_start);
    points.extend(
        timestamps
            .iter()
            .map(|&t| t.clamp(period_start, period_end)),
    );
    points.push(period_end);

    let mut intervals: Vec<StatusInterval> = Vec::new();
    for pair in points.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if end <= start {
            continue;
        }
        let state = if end - start < stale_gap_secs {
            LinkState::Live
        } else {
            LinkState::Stale
        };
        match intervals.last_mut() {
            Some(last) if last.state == state => last.end = end,
            _ => intervals.push(StatusInterval { start, end, state }),
        }
    }
    intervals
}

/// One point of the per-day power chart
///
/// Battery and grid are plotted with inverted sign so that flows into the
/// house are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerPoint {
    pub timestamp: Timestamp,
    pub solar_w: i64,
    pub load_w: i64,
    pub inverter_w: i64,
    pub battery_w: i64,
    pub grid_w: i64,
    pub soc_pct: u16,
}

impl From<&Sample> for PowerPoint {
    fn from(s: &Sample) -> Self {
        Self {
            timestamp: s.timestamp,
            solar_w: s.solar_w,
            load_w: s.load_w,
            inverter_w: s.inverter_residual_w,
            battery_w: -s.battery_w,
            grid_w: -s.grid_w,
            soc_pct: s.battery_soc_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Timestamp = 86_400;

    fn sample(t: Timestamp, solar: i64, load: i64, battery: i64, grid: i64) -> Sample {
        Sample::new(t, solar, load, battery, grid, 50)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_solar_priority_order() {
        // residual = 1000 - 400 - 300 - 0 = 300
        let alloc = allocate(&sample(0, 1000, 400, 300, 0));
        assert_eq!(alloc.get(Source::Solar, Sink::Grid), 0);
        assert_eq!(alloc.get(Source::Solar, Sink::Battery), 300);
        assert_eq!(alloc.get(Source::Solar, Sink::InverterResidual), 300);
        assert_eq!(alloc.get(Source::Solar, Sink::House), 400);
        assert_eq!(alloc.from_source(Source::Solar), 1000);
    }

    #[test]
    fn test_export_served_before_house() {
        // 2000 W solar, 500 W house, exporting 1500 W
        let alloc = allocate(&sample(0, 2000, 500, 0, 1500));
        assert_eq!(alloc.get(Source::Solar, Sink::Grid), 1500);
        assert_eq!(alloc.get(Source::Solar, Sink::House), 500);
        assert_eq!(alloc.to_sink(Sink::InverterResidual), 0);
    }

    #[test]
    fn test_night_import_and_discharge() {
        // battery discharging 300 W, grid importing 200 W, house 450 W, residual 50 W
        let alloc = allocate(&sample(0, 0, 450, -300, -200));
        assert_eq!(alloc.get(Source::Battery, Sink::InverterResidual), 50);
        assert_eq!(alloc.get(Source::Battery, Sink::House), 250);
        assert_eq!(alloc.get(Source::Grid, Sink::House), 200);
        assert_eq!(alloc.from_source(Source::Solar), 0);
    }

    #[test]
    fn test_negative_residual_has_no_capacity() {
        // residual = 100 - 500 - 0 - 0 = -400
        let alloc = allocate(&sample(0, 100, 500, 0, 0));
        assert_eq!(alloc.get(Source::Solar, Sink::InverterResidual), 0);
        assert_eq!(alloc.get(Source::Solar, Sink::House), 100);
        assert_eq!(alloc.total(), 100);
    }

    #[test]
    fn test_conservation_per_sample() {
        let cases = [
            sample(0, 1000, 400, 300, 0),
            sample(0, 3200, 900, 1800, 450),
            sample(0, 0, 700, -650, -80),
            sample(0, 150, 2200, -1500, -600),
            sample(0, 5000, 100, -200, 4000),
            sample(0, 0, 0, 0, 0),
        ];
        for s in &cases {
            let alloc = allocate(s);
            let supplied: i64 = Source::ALL.iter().map(|&src| alloc.from_source(src)).sum();
            let delivered: i64 = Sink::ALL.iter().map(|&sink| alloc.to_sink(sink)).sum();
            assert_eq!(supplied, delivered);
            if s.inverter_residual_w >= 0 {
                let available: i64 = Source::ALL.iter().map(|&src| src.supply(s)).sum();
                assert_eq!(supplied, available, "{:?}", s);
            }
        }
    }

    #[test]
    fn test_empty_period_is_all_zero() {
        let summary = EnergyFlowAllocator::new(0, DAY).finish();
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.soc_range, (0, 0));
        assert!(summary.totals.values().all(|v| v == 0.0));
        assert_eq!(summary.totals.values().count(), 12);
    }

    #[test]
    fn test_single_sample_spans_period() {
        let mut allocator = EnergyFlowAllocator::new(0, 3600);
        allocator.push(sample(1800, 1000, 1000, 0, 0));
        let totals = allocator.finish().totals;
        assert_close(totals.get(Source::Solar, Sink::House), 1.0);
    }

    #[test]
    fn test_weights_integrate_house_load() {
        let mut allocator = EnergyFlowAllocator::new(0, 1000);
        allocator.extend([
            sample(100, 0, 100, 0, -100),
            sample(300, 0, 200, 0, -200),
            sample(701, 0, 300, 0, -300),
        ]);
        let summary = allocator.finish();
        let ws = 200.0 * 100.0 + 300.5 * 200.0 + 499.5 * 300.0;
        assert_close(summary.totals.get(Source::Grid, Sink::House), ws / WS_PER_KWH);
        assert_close(summary.totals.from_source(Source::Grid), ws / WS_PER_KWH);
    }

    #[test]
    fn test_samples_outside_period_are_clamped() {
        let mut allocator = EnergyFlowAllocator::new(1000, 2000);
        allocator.extend([
            sample(500, 0, 3600, 0, -3600),
            sample(900, 0, 3600, 0, -3600),
            sample(1500, 0, 3600, 0, -3600),
        ]);
        let totals = allocator.finish().totals;
        // full 1000 s at 3600 W
        assert_close(totals.get(Source::Grid, Sink::House), 1.0);
    }

    #[test]
    fn test_soc_range() {
        let mut allocator = EnergyFlowAllocator::new(0, DAY);
        for (t, soc) in [(10, 55), (20, 31), (30, 97), (40, 60)] {
            allocator.push(Sample::new(t, 0, 0, 0, 0, soc));
        }
        assert_eq!(allocator.finish().soc_range, (31, 97));
    }

    #[test]
    fn test_link_status_classification() {
        let status = link_status(&[100, 300, 1000, 1100], 0, 2000, 400);
        assert_eq!(
            status,
            vec![
                StatusInterval { start: 0, end: 300, state: LinkState::Live },
                StatusInterval { start: 300, end: 1000, state: LinkState::Stale },
                StatusInterval { start: 1000, end: 1100, state: LinkState::Live },
                StatusInterval { start: 1100, end: 2000, state: LinkState::Stale },
            ]
        );
    }

    #[test]
    fn test_link_status_threshold_and_empty() {
        let status = link_status(&[399], 0, 798, 400);
        assert!(status.iter().all(|s| s.state == LinkState::Live));
        let status = link_status(&[400], 0, 800, 400);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, LinkState::Stale);
        assert_eq!(
            link_status(&[], 0, DAY, 400),
            vec![StatusInterval { start: 0, end: DAY, state: LinkState::Stale }]
        );
    }

    #[test]
    fn test_power_point_chart_signs() {
        let p = PowerPoint::from(&sample(5, 1500, 800, 200, -300));
        assert_eq!(p.battery_w, -200);
        assert_eq!(p.grid_w, 300);
        assert_eq!(p.inverter_w, 800);
    }
}
