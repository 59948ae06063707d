//! Tick latency histogram: time from tick start to the last alert evaluated.

use std::sync::Mutex;
use std::time::Duration;

/// Shared tick latency stats, in microseconds. The monitor records, anyone reads.
pub struct TickLatency {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

/// p50/p95/p99 in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub samples: u64,
}

impl TickLatency {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 100_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    /// None until the first tick is recorded.
    pub fn summary(&self) -> Option<LatencySummary> {
        let h = self.inner.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        Some(LatencySummary {
            p50_us: h.value_at_quantile(0.5),
            p95_us: h.value_at_quantile(0.95),
            p99_us: h.value_at_quantile(0.99),
            samples: h.len(),
        })
    }
}

impl Default for TickLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_summary() {
        assert!(TickLatency::new().summary().is_none());
    }

    #[test]
    fn percentiles_are_ordered() {
        let lat = TickLatency::new();
        for ms in 1..=100 {
            lat.record(Duration::from_millis(ms));
        }
        lat.record(Duration::ZERO);
        let s = lat.summary().unwrap();
        assert_eq!(s.samples, 101);
        assert!(s.p50_us <= s.p95_us && s.p95_us <= s.p99_us);
        assert!(s.p99_us >= 98_000);
    }
}
