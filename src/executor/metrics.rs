//! Checkpoint metric primitives.
//!
//! The executor owns four metric primitives: a checkpoint-rate meter, a
//! one-second sliding reservoir of checkpoint byte sizes, a one-day
//! histogram of per-second checkpoint byte volume, and the atomic
//! `last_bandwidth_update` timestamp gating histogram samples.
//!
//! Bandwidth is a rate, so sampling it on every write would double-count.
//! Instead the sliding window always holds the last second of sizes, and a
//! compare-exchange on the timestamp elects at most one writer per second to
//! push the window's sum into the histogram. No timer thread is involved; a
//! single successful CAS is the only producer of a histogram sample.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::clock::Clock;

/// Metric names recognized by operators' dashboards.
pub const CHECKPOINTING_RATE: &str = "Flows.Checkpointing Rate";
pub const CHECKPOINT_VOLUME_HIST: &str = "Flows.CheckpointVolumeBytesPerSecondHist";
pub const CHECKPOINT_VOLUME_CURRENT: &str = "Flows.CheckpointVolumeBytesPerSecondCurrent";

const ONE_SECOND_NANOS: u64 = 1_000_000_000;
/// One sample per second for a day.
const BANDWIDTH_HISTOGRAM_CAPACITY: usize = 86_400;

/// Monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Meter {
    count: AtomicU64,
}

impl Meter {
    pub fn mark(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Reservoir keeping only samples recorded within a trailing time window.
#[derive(Debug)]
pub struct SlidingTimeWindow {
    window_nanos: u64,
    samples: Mutex<VecDeque<(u64, u64)>>,
}

impl SlidingTimeWindow {
    #[must_use]
    pub fn new(window_nanos: u64) -> Self {
        Self {
            window_nanos,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, now_nanos: u64, value: u64) {
        let mut samples = self.samples.lock();
        samples.push_back((now_nanos, value));
        Self::evict(&mut samples, now_nanos, self.window_nanos);
    }

    /// Values still inside the window at `now_nanos`.
    pub fn values(&self, now_nanos: u64) -> Vec<u64> {
        let mut samples = self.samples.lock();
        Self::evict(&mut samples, now_nanos, self.window_nanos);
        samples.iter().map(|(_, v)| *v).collect()
    }

    /// Sum of the values still inside the window at `now_nanos`.
    pub fn sum(&self, now_nanos: u64) -> u64 {
        self.values(now_nanos).iter().sum()
    }

    fn evict(samples: &mut VecDeque<(u64, u64)>, now_nanos: u64, window_nanos: u64) {
        let horizon = now_nanos.saturating_sub(window_nanos);
        while samples.front().is_some_and(|(t, _)| *t < horizon) {
            samples.pop_front();
        }
    }
}

/// Bounded-capacity histogram; oldest samples fall off first.
#[derive(Debug)]
pub struct Histogram {
    capacity: usize,
    samples: Mutex<VecDeque<u64>>,
}

impl Histogram {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, value: u64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.samples.lock().iter().copied().collect()
    }

    pub fn max(&self) -> Option<u64> {
        self.samples.lock().iter().copied().max()
    }
}

type GaugeFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Registration of metric primitives by string name.
///
/// Exporter backends walk the registry; the executor only ever registers.
/// Registering an existing name returns the existing primitive.
#[derive(Default)]
pub struct MetricsRegistry {
    meters: RwLock<FxHashMap<String, Arc<Meter>>>,
    histograms: RwLock<FxHashMap<String, Arc<Histogram>>>,
    gauges: RwLock<FxHashMap<String, GaugeFn>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meter(&self, name: &str) -> Arc<Meter> {
        if let Some(meter) = self.meters.read().get(name) {
            return Arc::clone(meter);
        }
        Arc::clone(
            self.meters
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Meter::default())),
        )
    }

    pub fn histogram(&self, name: &str, capacity: usize) -> Arc<Histogram> {
        if let Some(hist) = self.histograms.read().get(name) {
            return Arc::clone(hist);
        }
        Arc::clone(
            self.histograms
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::with_capacity(capacity))),
        )
    }

    pub fn register_gauge(&self, name: &str, gauge: impl Fn() -> f64 + Send + Sync + 'static) {
        self.gauges
            .write()
            .insert(name.to_string(), Arc::new(gauge));
    }

    /// Read a registered gauge's current value.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).map(|g| g())
    }
}

/// The executor's four checkpoint metric primitives, wired together.
pub struct CheckpointMetrics {
    meter: Arc<Meter>,
    window: Arc<SlidingTimeWindow>,
    histogram: Arc<Histogram>,
    last_bandwidth_update: AtomicU64,
}

impl CheckpointMetrics {
    /// Register the checkpoint metrics into `registry`, wiring the
    /// bytes-per-second gauge to the sliding window.
    pub fn register(registry: &MetricsRegistry, clock: Arc<dyn Clock>) -> Self {
        let meter = registry.meter(CHECKPOINTING_RATE);
        let histogram = registry.histogram(CHECKPOINT_VOLUME_HIST, BANDWIDTH_HISTOGRAM_CAPACITY);
        let window = Arc::new(SlidingTimeWindow::new(ONE_SECOND_NANOS));
        let gauge_window = Arc::clone(&window);
        registry.register_gauge(CHECKPOINT_VOLUME_CURRENT, move || {
            gauge_window.sum(clock.monotonic_nanos()) as f64
        });
        Self {
            meter,
            window,
            histogram,
            last_bandwidth_update: AtomicU64::new(0),
        }
    }

    /// Record one persisted checkpoint of `bytes` length.
    pub fn record_checkpoint(&self, bytes: u64, now_nanos: u64) {
        self.meter.mark();
        self.window.record(now_nanos, bytes);
        self.maybe_sample_bandwidth(now_nanos);
    }

    /// Push the rolling one-second byte volume into the histogram, at most
    /// once per second. The CAS elects the single sampling writer.
    fn maybe_sample_bandwidth(&self, now_nanos: u64) {
        let last = self.last_bandwidth_update.load(Ordering::Acquire);
        if now_nanos.saturating_sub(last) < ONE_SECOND_NANOS {
            return;
        }
        if self
            .last_bandwidth_update
            .compare_exchange(last, now_nanos, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.histogram.record(self.window.sum(now_nanos));
        }
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn window(&self) -> &SlidingTimeWindow {
        &self.window
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}

impl std::fmt::Debug for CheckpointMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointMetrics")
            .field("checkpoints", &self.meter.count())
            .field("bandwidth_samples", &self.histogram.count())
            .finish()
    }
}
