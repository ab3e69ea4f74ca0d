use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Observations kept per histogram; older ones fall off.
const HISTOGRAM_WINDOW: usize = 1024;

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Sliding-window histogram for percentile computation.
struct Histogram {
    observations: Mutex<VecDeque<f64>>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(VecDeque::with_capacity(HISTOGRAM_WINDOW)),
        }
    }
    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() == HISTOGRAM_WINDOW {
            let _ = obs.pop_front();
        }
        obs.push_back(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs: Vec<f64> = self.observations.lock().iter().copied().collect();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        let p50 = obs[count / 2];
        let p95 = obs[((count as f64 * 0.95) as usize).min(count - 1)];
        let p99 = obs[((count as f64 * 0.99) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum,
            p50,
            p95,
            p99,
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + sorted labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    /// `name{k=v,k2=v2}`, or just `name` when unlabelled.
    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Point-in-time copy of every metric, served by the status endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, rendered_key: &str) -> u64 {
        self.counters.get(rendered_key).copied().unwrap_or(0)
    }

    /// Sum of a counter across all of its label sets.
    pub fn total(&self, name: &str) -> u64 {
        let labelled = format!("{name}{{");
        self.counters
            .iter()
            .filter(|(k, _)| k.as_str() == name || k.starts_with(&labelled))
            .map(|(_, v)| *v)
            .sum()
    }
}

pub const MESSAGES_RECEIVED: &str = "messages.received";
pub const RESPONSES_DISPATCHED: &str = "responses.dispatched";
pub const RESPONSES_SUPPRESSED: &str = "responses.suppressed";
pub const DISPATCH_FAILURES: &str = "dispatch.failures";
pub const PROVIDER_FAILURES: &str = "provider.failures";
pub const COMPLETION_LATENCY_MS: &str = "completion.latency_ms";

/// Thread-safe in-memory recorder for pipeline counters.
#[derive(Default)]
pub struct PipelineMetrics {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let c = counters.entry(key).or_insert_with(Counter::new);
        c.increment(n);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        let h = histograms.entry(key).or_insert_with(Histogram::new);
        h.observe(value);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, |c| c.get())
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    // ── Pipeline vocabulary ─────────────────────────────────────────

    pub fn record_received(&self) {
        self.counter_inc(MESSAGES_RECEIVED, &[], 1);
    }

    pub fn record_dispatched(&self, mode: &str) {
        self.counter_inc(RESPONSES_DISPATCHED, &[("mode", mode)], 1);
    }

    /// A response that was decided on but never sent (`reason` says why).
    pub fn record_suppressed(&self, reason: &str) {
        self.counter_inc(RESPONSES_SUPPRESSED, &[("reason", reason)], 1);
    }

    pub fn record_dispatch_failure(&self) {
        self.counter_inc(DISPATCH_FAILURES, &[], 1);
    }

    pub fn record_provider_failure(&self, kind: &str) {
        self.counter_inc(PROVIDER_FAILURES, &[("kind", kind)], 1);
    }

    pub fn observe_completion_ms(&self, ms: f64) {
        self.histogram_observe(COMPLETION_LATENCY_MS, &[], ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .iter()
            .map(|(k, c)| (k.render(), c.get()))
            .collect();
        let histograms = self
            .histograms
            .read()
            .iter()
            .map(|(k, h)| (k.render(), h.summary()))
            .collect();
        MetricsSnapshot {
            counters,
            histograms,
        }
    }
}
