//! Service metrics
//!
//! Lock-free counters and gauges for the mutation cycle and the channel set,
//! rendered in the Prometheus text exposition format by `/metrics`.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Integer gauge.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counter family keyed by label values.
#[derive(Debug)]
pub struct CounterVec {
    label_names: &'static [&'static str],
    entries: RwLock<BTreeMap<Vec<String>, Arc<Counter>>>,
}

impl CounterVec {
    pub fn new(label_names: &'static [&'static str]) -> Self {
        Self {
            label_names,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, label_values: &[&str]) {
        self.with(label_values).inc();
    }

    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        self.entries.read().get(&key).map(|c| c.get()).unwrap_or(0)
    }

    fn with(&self, label_values: &[&str]) -> Arc<Counter> {
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        if let Some(counter) = self.entries.read().get(&key) {
            return Arc::clone(counter);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key).or_default())
    }
}

/// Cumulative histogram over fixed upper bounds (seconds).
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let buckets = (0..bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Service metrics
// ---------------------------------------------------------------------------

/// Outcome label for `pollcast_actions_total`.
pub mod outcome {
    pub const APPLIED: &str = "applied";
    pub const IGNORED: &str = "ignored";
    pub const MALFORMED: &str = "malformed";
    pub const FAILED: &str = "failed";
}

/// Every metric the service exports.
#[derive(Debug)]
pub struct PollMetrics {
    /// Actions processed, by `kind` and `outcome`.
    pub actions: CounterVec,
    pub broadcasts: Counter,
    pub dropped_channels: Counter,
    pub store_failures: Counter,
    pub open_channels: Gauge,
    pub cycle_duration: Histogram,
}

impl Default for PollMetrics {
    fn default() -> Self {
        Self {
            actions: CounterVec::new(&["kind", "outcome"]),
            broadcasts: Counter::default(),
            dropped_channels: Counter::default(),
            store_failures: Counter::default(),
            open_channels: Gauge::default(),
            cycle_duration: Histogram::new(vec![0.001, 0.005, 0.025, 0.1, 0.5, 2.5]),
        }
    }
}

impl PollMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);

        header(&mut out, "pollcast_actions_total", "Actions processed", "counter");
        for (values, counter) in self.actions.entries.read().iter() {
            let _ = writeln!(
                out,
                "pollcast_actions_total{} {}",
                format_labels(self.actions.label_names, values),
                counter.get()
            );
        }

        simple(
            &mut out,
            "pollcast_broadcasts_total",
            "Documents fanned out to all channels",
            "counter",
            self.broadcasts.get(),
        );
        simple(
            &mut out,
            "pollcast_dropped_channels_total",
            "Channels removed after a failed delivery",
            "counter",
            self.dropped_channels.get(),
        );
        simple(
            &mut out,
            "pollcast_store_failures_total",
            "Failed loads or saves of the poll document",
            "counter",
            self.store_failures.get(),
        );
        simple(
            &mut out,
            "pollcast_open_channels",
            "Currently registered channels",
            "gauge",
            self.open_channels.get(),
        );

        let name = "pollcast_cycle_duration_seconds";
        header(&mut out, name, "Duration of load/apply/save/broadcast cycles", "histogram");
        let h = &self.cycle_duration;
        for (bound, bucket) in h.bounds.iter().zip(&h.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, h.count());
        let sum = h.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", name, sum);
        let _ = writeln!(out, "{}_count {}", name, h.count());

        out
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn simple(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    header(out, name, help, kind);
    let _ = writeln!(out, "{} {}", name, value);
}

fn format_labels(names: &[&str], values: &[String]) -> String {
    let pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label_value(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
