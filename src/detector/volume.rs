use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::stats::{mean_std, z_score};
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyType};

/// Volume spike: short-window traded size vs the per-bucket baseline.
///
/// Score mapping: `min(100, z * 20)`, so z = 5 saturates.
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let current = w.current_trades();
    if current.len() < cfg.min_samples {
        return Vec::new();
    }

    let volume_in_window: f64 = current.iter().map(|t| t.size).sum();
    let baseline: Vec<f64> = w
        .baseline_buckets(cfg.baseline_multiplier)
        .iter()
        .map(|bucket| bucket.iter().map(|t| t.size).sum())
        .collect();
    let Some(stats) = mean_std(&baseline) else {
        return Vec::new();
    };

    let z = z_score(volume_in_window, &stats);
    let Some(severity) = cfg.volume_z.classify(z) else {
        return Vec::new();
    };

    let ratio = if stats.mean > 0.0 { volume_in_window / stats.mean } else { f64::INFINITY };
    let message = format!(
        "Volume spike on {}: {:.0} traded in {}m ({:.1}x baseline, z={:.2})",
        w.label(),
        volume_in_window,
        w.window_minutes(),
        ratio,
        z,
    );
    let timestamp = current.last().map(|t| t.timestamp).unwrap_or(w.now);

    vec![w.event(
        w.anomaly_id(AnomalyType::VolumeSpike),
        AnomalyType::VolumeSpike,
        severity,
        z * 20.0,
        message,
        timestamp,
        AnomalyContext {
            z_score: Some(z),
            volume_in_window: Some(volume_in_window),
            mean_volume: Some(stats.mean),
            ..AnomalyContext::default()
        },
        None,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;
    use crate::types::{Severity, Trade};

    fn run(trades: &[Trade]) -> Vec<AnomalyEvent> {
        let w = MarketWindow {
            market_id: "M1",
            trades,
            metadata: None,
            depth: &[],
            now: NOW,
            window_ms: WINDOW,
        };
        detect(&w, &DetectionConfig::default())
    }

    fn spike(total: f64, count: usize) -> Vec<Trade> {
        (0..count)
            .map(|i| yes(0.5, total / count as f64, NOW - WINDOW + 1 + i as i64 * 1_000))
            .collect()
    }

    #[test]
    fn triple_baseline_is_at_least_medium() {
        let mut trades = baseline(&[800.0, 1200.0, 1000.0, 900.0, 1100.0, 1000.0]);
        trades.extend(spike(3000.0, 10));
        trades.sort_by_key(|t| t.timestamp);

        let events = run(&trades);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.anomaly_type, AnomalyType::VolumeSpike);
        assert!(e.severity >= Severity::Medium);
        assert!((e.context.volume_in_window.unwrap() - 3000.0).abs() < 1e-9);
        assert!((e.context.mean_volume.unwrap() - 1000.0).abs() < 1e-9);
        assert!(e.score > 0.0 && e.score <= 100.0);
    }

    #[test]
    fn fewer_than_min_samples_never_fires() {
        let mut trades = baseline(&[10.0, 20.0, 10.0, 20.0, 10.0, 20.0]);
        trades.extend(spike(100_000.0, 2));
        trades.sort_by_key(|t| t.timestamp);
        assert!(run(&trades).is_empty());
    }

    #[test]
    fn flat_baseline_has_zero_z() {
        let mut trades = baseline(&[100.0; 6]);
        trades.extend(spike(10_000.0, 5));
        trades.sort_by_key(|t| t.timestamp);
        assert!(run(&trades).is_empty());
    }

    #[test]
    fn ordinary_volume_is_quiet() {
        let mut trades = baseline(&[800.0, 1200.0, 1000.0, 900.0, 1100.0, 1000.0]);
        trades.extend(spike(1000.0, 5));
        trades.sort_by_key(|t| t.timestamp);
        assert!(run(&trades).is_empty());
    }
}
