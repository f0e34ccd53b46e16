//! Observability: per-dispatch request ids and latency histograms.
//! Histograms track p50/p95/p99 over the most recent samples.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Identifiers attached to every dispatched translation.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub generation: u64,
}

impl RequestIds {
    pub fn new(generation: u64) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            generation,
        }
    }
}

/// Records the time from creation to `finish` under one metric name.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn finish(self) {
        self.registry
            .record(self.name, self.start.elapsed().as_micros() as f64);
    }
}

/// Most recent samples of one metric, oldest first.
struct Window {
    samples: VecDeque<f64>,
}

impl Window {
    fn push(&mut self, value: f64) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn summarize(&self) -> MetricSummary {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let at = |p: f64| {
            let last = sorted.len().saturating_sub(1);
            sorted
                .get(((p / 100.0) * last as f64).round() as usize)
                .copied()
                .unwrap_or(0.0)
        };
        MetricSummary {
            p50_us: at(50.0),
            p95_us: at(95.0),
            p99_us: at(99.0),
            count: sorted.len(),
        }
    }
}

const WINDOW: usize = 256;

/// Latency windows keyed by metric name.
#[derive(Default)]
pub struct MetricsRegistry {
    windows: Mutex<HashMap<&'static str, Window>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        self.windows
            .lock()
            .entry(name)
            .or_insert_with(|| Window {
                samples: VecDeque::with_capacity(WINDOW),
            })
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// p50/p95/p99 per metric, ordered by name.
    pub fn summary(&self) -> BTreeMap<&'static str, MetricSummary> {
        self.windows
            .lock()
            .iter()
            .map(|(&name, window)| (name, window.summarize()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

/// Well-known metric names.
pub mod metric_names {
    /// Backend reachability probe round trip.
    pub const PROBE: &str = "t_probe";
    /// Clipboard change observed -> dispatch (debounce + throttle wait).
    pub const CHANGE_TO_DISPATCH: &str = "t_change_to_dispatch";
    /// Translate call including retries.
    pub const TRANSLATE_DONE: &str = "t_translate_done";
    /// Dispatches answered from the cache (value is lookup time).
    pub const CACHE_HIT: &str = "cache_hit";
}
