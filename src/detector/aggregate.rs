use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{MarketWindow, DETECTORS};
use crate::config::DetectionConfig;
use crate::scorer::compute_heat_scores;
use crate::types::{
    normalize_timestamp_ms, AnomalyEvent, AnomalyReport, DepthSample, DetectionWindow, Severity,
    Trade,
};

/// Runs every detector over every market in `input.trades_by_market` and scores
/// each market's heat.
///
/// Pure: identical inputs yield identical output. Malformed trades are dropped,
/// timestamps normalized to ms, and anything after `now` or older than the
/// lookback is ignored. Output anomalies are deduplicated by id (first wins) in
/// market-id order; heat scores are in market-id order.
pub fn compute_market_anomalies(input: &DetectionWindow, cfg: &DetectionConfig) -> AnomalyReport {
    let window_ms = if input.window_ms > 0 { input.window_ms } else { cfg.effective_window_ms() };
    let oldest = input.now - cfg.lookback_ms_for(window_ms);

    let mut market_ids: Vec<&str> = input.trades_by_market.keys().map(String::as_str).collect();
    market_ids.sort_unstable();

    let mut anomalies = Vec::new();
    let mut seen = HashSet::new();
    let mut dropped = 0usize;

    for &market_id in &market_ids {
        let raw = &input.trades_by_market[market_id];
        let trades = sanitize_trades(market_id, raw, oldest, input.now);
        dropped += raw.len() - trades.len();

        let depth = input
            .depth_by_market
            .get(market_id)
            .map(|samples| sanitize_depth(samples, oldest, input.now))
            .unwrap_or_default();

        let window = MarketWindow {
            market_id,
            trades: &trades,
            metadata: input.metadata_by_market.get(market_id),
            depth: &depth,
            now: input.now,
            window_ms,
        };

        for detector in DETECTORS {
            if detector.needs_metadata && window.metadata.is_none() {
                debug!(market_id, detector = %detector.kind, "skipping detector: no metadata");
                continue;
            }
            for event in (detector.run)(&window, cfg) {
                if seen.insert(event.id.clone()) {
                    anomalies.push(event);
                }
            }
        }
    }

    if dropped > 0 {
        debug!(dropped, "ignored trades outside the lookback or malformed");
    }

    let heat_scores =
        compute_heat_scores(market_ids.iter().copied(), &anomalies, &cfg.heat_weights, &cfg.heat_bands);

    AnomalyReport { anomalies, heat_scores }
}

/// Well-formed trades for `market_id` with ms timestamps in `(oldest, now]`,
/// sorted by time with a total tie-break so input order never matters.
fn sanitize_trades(market_id: &str, raw: &[Trade], oldest: i64, now: i64) -> Vec<Trade> {
    let mut trades: Vec<Trade> = raw
        .iter()
        .filter(|t| t.is_well_formed() && t.market_id == market_id)
        .map(|t| Trade { timestamp: normalize_timestamp_ms(t.timestamp), ..t.clone() })
        .filter(|t| t.timestamp > oldest && t.timestamp <= now)
        .collect();
    trades.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
            .then_with(|| a.price.total_cmp(&b.price))
            .then_with(|| a.size.total_cmp(&b.size))
    });
    trades
}

fn sanitize_depth(raw: &[DepthSample], oldest: i64, now: i64) -> Vec<DepthSample> {
    let mut samples: Vec<DepthSample> = raw
        .iter()
        .filter(|s| s.depth.is_finite() && s.depth >= 0.0)
        .map(|s| DepthSample { timestamp: normalize_timestamp_ms(s.timestamp), depth: s.depth })
        .filter(|s| s.timestamp > oldest && s.timestamp <= now)
        .collect();
    samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.depth.total_cmp(&b.depth)));
    samples
}

// ---------------------------------------------------------------------------
// Ranking and diffing helpers for callers
// ---------------------------------------------------------------------------

/// Severity descending, then newest first, then id for a stable order.
pub fn sort_anomalies(anomalies: &mut [AnomalyEvent]) {
    anomalies.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn filter_min_severity(anomalies: &[AnomalyEvent], min: Severity) -> Vec<AnomalyEvent> {
    anomalies.iter().filter(|a| a.severity >= min).cloned().collect()
}

/// Change set between two ticks, keyed by anomaly id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyDiff {
    /// Ids present now but not before.
    pub added: Vec<AnomalyEvent>,
    /// Ids present before but gone now.
    pub cleared: Vec<AnomalyEvent>,
    /// Ids present in both; carries the fresh copy.
    pub retained: Vec<AnomalyEvent>,
}

pub fn diff_anomalies(prev: &[AnomalyEvent], next: &[AnomalyEvent]) -> AnomalyDiff {
    let prev_ids: HashMap<&str, &AnomalyEvent> = prev.iter().map(|a| (a.id.as_str(), a)).collect();
    let next_ids: HashSet<&str> = next.iter().map(|a| a.id.as_str()).collect();

    let mut diff = AnomalyDiff::default();
    for a in next {
        if prev_ids.contains_key(a.id.as_str()) {
            diff.retained.push(a.clone());
        } else {
            diff.added.push(a.clone());
        }
    }
    diff.cleared = prev
        .iter()
        .filter(|a| !next_ids.contains(a.id.as_str()))
        .cloned()
        .collect();
    diff
}
