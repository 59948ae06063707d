use std::collections::HashMap;

use crate::config::{HeatBandThresholds, HeatWeights};
use crate::types::{AnomalyEvent, HeatBand, MarketHeatScore, Severity};

/// Composite heat of one market: sum of severity weights, clamped to [0, 100].
/// Weights are non-negative, so adding an anomaly or raising its severity never
/// lowers the result.
pub fn heat_score<I>(severities: I, weights: &HeatWeights) -> f64
where
    I: IntoIterator<Item = Severity>,
{
    let raw: f64 = severities.into_iter().map(|s| weights.weight(s)).sum();
    raw.clamp(0.0, 100.0)
}

/// Maps a heat score to its band. Total over every f64: the chain checks the
/// highest band first and falls through to `Quiet`, so NaN is quiet too.
pub fn get_severity_band(score: f64, thresholds: &HeatBandThresholds) -> HeatBand {
    if score >= thresholds.extreme {
        HeatBand::Extreme
    } else if score >= thresholds.hot {
        HeatBand::Hot
    } else if score >= thresholds.active {
        HeatBand::Active
    } else {
        HeatBand::Quiet
    }
}

/// Heat for every market in `market_ids` (markets with no anomalies score 0),
/// returned in the order given.
pub fn compute_heat_scores<'a>(
    market_ids: impl IntoIterator<Item = &'a str>,
    anomalies: &[AnomalyEvent],
    weights: &HeatWeights,
    bands: &HeatBandThresholds,
) -> Vec<MarketHeatScore> {
    let mut by_market: HashMap<&str, Vec<Severity>> = HashMap::new();
    for a in anomalies {
        by_market.entry(a.market_id.as_str()).or_default().push(a.severity);
    }

    market_ids
        .into_iter()
        .map(|id| {
            let severities = by_market.get(id).cloned().unwrap_or_default();
            let score = heat_score(severities, weights);
            MarketHeatScore {
                market_id: id.to_string(),
                score,
                band: get_severity_band(score, bands),
            }
        })
        .collect()
}
