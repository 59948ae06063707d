use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::stats::mean_std;
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyType};

/// Depth shift: latest book-depth sample vs the mean of the baseline samples.
/// No-op for markets without a depth feed.
///
/// Score mapping: `min(100, |change%|)`.
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let Some(current) = w.depth_between(w.window_start(), w.now).last() else {
        return Vec::new();
    };
    let baseline_start = w.now - cfg.lookback_ms_for(w.window_ms);
    let baseline: Vec<f64> = w
        .depth_between(baseline_start, w.window_start())
        .iter()
        .map(|s| s.depth)
        .collect();
    if baseline.len() < cfg.min_samples {
        return Vec::new();
    }
    let Some(stats) = mean_std(&baseline) else {
        return Vec::new();
    };
    if !(stats.mean > 0.0) {
        return Vec::new();
    }

    let change = (current.depth - stats.mean) / stats.mean * 100.0;
    let Some(severity) = cfg.depth_change_pct.classify(change.abs()) else {
        return Vec::new();
    };

    let verb = if change < 0.0 { "drained" } else { "surged" };
    let message = format!(
        "Book depth {verb} {:.0}% on {} ({:.0} vs {:.0} baseline)",
        change.abs(),
        w.label(),
        current.depth,
        stats.mean,
    );

    vec![w.event(
        w.anomaly_id(AnomalyType::DepthShift),
        AnomalyType::DepthShift,
        severity,
        change.abs(),
        message,
        current.timestamp,
        AnomalyContext { depth_change: Some(change), ..AnomalyContext::default() },
        None,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;
    use crate::types::{DepthSample, Severity};

    fn sample(ts: i64, depth: f64) -> DepthSample {
        DepthSample { timestamp: ts, depth }
    }

    fn run(depth: &[DepthSample]) -> Vec<AnomalyEvent> {
        let w = MarketWindow {
            market_id: "M1",
            trades: &[],
            metadata: None,
            depth,
            now: NOW,
            window_ms: WINDOW,
        };
        detect(&w, &DetectionConfig::default())
    }

    #[test]
    fn liquidity_drain_fires() {
        let depth = vec![
            sample(NOW - 4 * WINDOW, 1_000.0),
            sample(NOW - 3 * WINDOW, 1_000.0),
            sample(NOW - 2 * WINDOW, 1_000.0),
            sample(NOW - 1_000, 400.0),
        ];
        let events = run(&depth);
        assert_eq!(events.len(), 1);
        assert!((events[0].context.depth_change.unwrap() + 60.0).abs() < 1e-9);
        assert_eq!(events[0].severity, Severity::High);
        assert!((events[0].score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn missing_feed_is_a_no_op() {
        assert!(run(&[]).is_empty());
    }

    #[test]
    fn thin_baseline_is_a_no_op() {
        let depth = vec![sample(NOW - 2 * WINDOW, 1_000.0), sample(NOW - 1_000, 10.0)];
        assert!(run(&depth).is_empty());
    }

    #[test]
    fn stale_current_sample_is_ignored() {
        let depth = vec![
            sample(NOW - 4 * WINDOW, 1_000.0),
            sample(NOW - 3 * WINDOW, 1_000.0),
            sample(NOW - 2 * WINDOW, 100.0),
        ];
        assert!(run(&depth).is_empty());
    }
}
