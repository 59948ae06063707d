use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyType, Outcome, Trade};

/// YES vs NO traded size over a set of fills.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowSplit {
    pub yes_volume: f64,
    pub no_volume: f64,
}

impl FlowSplit {
    pub fn of(trades: &[Trade]) -> Self {
        trades.iter().fold(Self::default(), |mut acc, t| {
            match t.outcome {
                Outcome::Yes => acc.yes_volume += t.size,
                Outcome::No => acc.no_volume += t.size,
            }
            acc
        })
    }

    pub fn total(&self) -> f64 {
        self.yes_volume + self.no_volume
    }

    /// `(yes - no) / (yes + no) * 100`, in [-100, 100]. None without volume.
    pub fn signed_imbalance_pct(&self) -> Option<f64> {
        let total = self.total();
        if total > 0.0 {
            Some((self.yes_volume - self.no_volume) / total * 100.0)
        } else {
            None
        }
    }
}

/// Flow imbalance: one outcome dominating the short window's volume.
///
/// Score mapping: the imbalance percentage itself (already 0–100).
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let current = w.current_trades();
    if current.len() < cfg.min_samples {
        return Vec::new();
    }
    let split = FlowSplit::of(current);
    let Some(signed) = split.signed_imbalance_pct() else {
        return Vec::new();
    };
    let imbalance = signed.abs();
    let Some(severity) = cfg.flow_imbalance_pct.classify(imbalance) else {
        return Vec::new();
    };

    let side = if signed >= 0.0 { "YES" } else { "NO" };
    let message = format!(
        "{side}-heavy flow on {}: {imbalance:.0}% imbalance over {:.0} traded",
        w.label(),
        split.total(),
    );
    let timestamp = current.last().map(|t| t.timestamp).unwrap_or(w.now);

    vec![w.event(
        w.anomaly_id(AnomalyType::FlowImbalance),
        AnomalyType::FlowImbalance,
        severity,
        imbalance,
        message,
        timestamp,
        AnomalyContext {
            imbalance_percentage: Some(imbalance),
            volume_in_window: Some(split.total()),
            ..AnomalyContext::default()
        },
        None,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;
    use crate::types::Severity;

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

    #[test]
    fn lopsided_flow_fires() {
        let trades = vec![
            yes(0.5, 90.0, NOW - 3_000),
            yes(0.5, 85.0, NOW - 2_000),
            trade("M1", Outcome::No, 0.5, 5.0, NOW - 1_000),
        ];
        let events = run(&trades);
        assert_eq!(events.len(), 1);
        let imbalance = events[0].context.imbalance_percentage.unwrap();
        assert!((imbalance - 94.444).abs() < 0.01, "imbalance={imbalance}");
        assert_eq!(events[0].severity, Severity::Extreme);
        assert!(events[0].message.starts_with("YES-heavy"));
    }

    #[test]
    fn balanced_flow_is_quiet() {
        let trades = vec![
            yes(0.5, 50.0, NOW - 3_000),
            trade("M1", Outcome::No, 0.5, 50.0, NOW - 2_000),
            yes(0.5, 10.0, NOW - 1_000),
        ];
        assert!(run(&trades).is_empty());
    }

    #[test]
    fn too_few_trades_is_quiet() {
        let trades = vec![yes(0.5, 90.0, NOW - 3_000), yes(0.5, 90.0, NOW - 2_000)];
        assert!(run(&trades).is_empty());
    }

    #[test]
    fn signed_imbalance_direction() {
        let split = FlowSplit { yes_volume: 25.0, no_volume: 75.0 };
        assert_eq!(split.signed_imbalance_pct(), Some(-50.0));
        assert_eq!(FlowSplit::default().signed_imbalance_pct(), None);
    }
}
