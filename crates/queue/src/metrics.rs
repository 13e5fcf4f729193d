//! Message counters and per-method timings kept by every backend.
//!
//! Counters are plain atomics; per-method stats live behind a mutex that is
//! only held for the duration of a single map update.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

/// Running count / total / max / mean of a duration measurement, in ms.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
}

impl DurationStats {
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count += 1;
        self.total_ms += ms;
        self.max_ms = self.max_ms.max(ms);
        // Incremental mean: new_avg = prev_avg + (x - prev_avg) / count
        self.mean_ms += (ms as f64 - self.mean_ms) / self.count as f64;
    }
}

/// Stats for a single work method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MethodStats {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Handler run time.
    pub timing: DurationStats,
    /// Time between enqueue and dispatch, for messages that carry `at`.
    pub delay: DurationStats,
}

/// JSON-serializable view of [`BackendMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub parse_errors: u64,
    pub delay: DurationStats,
    pub methods: BTreeMap<String, MethodStats>,
}

/// Thread-safe message metrics for one backend.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    received: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    parse_errors: AtomicU64,
    delay: Mutex<DurationStats>,
    methods: Mutex<HashMap<String, MethodStats>>,
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, count: usize) {
        self.received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_processed(&self, method: &str, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.with_method(method, |m| {
            m.processed += 1;
            m.timing.record(elapsed);
        });
    }

    pub fn record_skipped(&self, method: &str, elapsed: Duration) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.with_method(method, |m| {
            m.skipped += 1;
            m.timing.record(elapsed);
        });
    }

    pub fn record_error(&self, method: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.with_method(method, |m| m.errors += 1);
    }

    /// A message body that could not be decoded. Counts as an error too.
    pub fn record_parse_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delay(&self, method: &str, delay: Duration) {
        lock(&self.delay).record(delay);
        self.with_method(method, |m| m.delay.record(delay));
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Stats for one method, if it has been seen.
    pub fn method(&self, method: &str) -> Option<MethodStats> {
        lock(&self.methods).get(method).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received(),
            processed: self.processed(),
            skipped: self.skipped(),
            errors: self.errors(),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            delay: lock(&self.delay).clone(),
            methods: lock(&self.methods)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn with_method(&self, method: &str, f: impl FnOnce(&mut MethodStats)) {
        let mut methods = lock(&self.methods);
        f(methods.entry(method.to_string()).or_default());
    }
}

/// Metrics must stay readable even if a recording thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_stats_running_mean() {
        let mut s = DurationStats::default();
        s.record(Duration::from_millis(100));
        s.record(Duration::from_millis(200));
        s.record(Duration::from_millis(300));

        assert_eq!(s.count, 3);
        assert_eq!(s.total_ms, 600);
        assert_eq!(s.max_ms, 300);
        assert!((s.mean_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn counters_and_method_stats() {
        let m = BackendMetrics::new();
        m.record_received(3);
        m.record_processed("a", Duration::from_millis(5));
        m.record_skipped("a", Duration::from_millis(1));
        m.record_error("b");
        m.record_parse_error();

        assert_eq!(m.received(), 3);
        assert_eq!(m.processed(), 1);
        assert_eq!(m.skipped(), 1);
        assert_eq!(m.errors(), 2);

        let a = m.method("a").unwrap();
        assert_eq!((a.processed, a.skipped, a.errors), (1, 1, 0));
        assert_eq!(a.timing.count, 2);
        assert_eq!(m.method("b").unwrap().errors, 1);
        assert!(m.method("c").is_none());
    }

    #[test]
    fn snapshot_serializes() {
        let m = BackendMetrics::new();
        m.record_delay("a", Duration::from_millis(40));

        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["delay"]["count"], 1);
        assert_eq!(json["methods"]["a"]["delay"]["max_ms"], 40);
        assert_eq!(json["parse_errors"], 0);
    }
}
