use std::collections::HashSet;

use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::stats::{mean_std, z_score};
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyType, Trade};

fn distinct_wallets(trades: &[Trade]) -> usize {
    trades
        .iter()
        .filter_map(|t| t.wallet_address.as_deref())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<HashSet<_>>()
        .len()
}

/// Participant spike: distinct wallets in the short window vs per-bucket baseline.
/// Fills without a wallet address are ignored.
///
/// Score mapping: `min(100, z * 20)`.
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let current = w.current_trades();
    let attributed = current.iter().filter(|t| t.wallet_address.is_some()).count();
    if attributed < cfg.min_samples {
        return Vec::new();
    }

    let participants = distinct_wallets(current);
    let baseline: Vec<f64> = w
        .baseline_buckets(cfg.baseline_multiplier)
        .iter()
        .map(|bucket| distinct_wallets(bucket) as f64)
        .collect();
    let Some(stats) = mean_std(&baseline) else {
        return Vec::new();
    };
    let z = z_score(participants as f64, &stats);
    let Some(severity) = cfg.participant_z.classify(z) else {
        return Vec::new();
    };

    let message = format!(
        "{participants} distinct traders on {} in {}m (baseline {:.1}, z={z:.2})",
        w.label(),
        w.window_minutes(),
        stats.mean,
    );
    let timestamp = current.last().map(|t| t.timestamp).unwrap_or(w.now);

    vec![w.event(
        w.anomaly_id(AnomalyType::ParticipantSpike),
        AnomalyType::ParticipantSpike,
        severity,
        z * 20.0,
        message,
        timestamp,
        AnomalyContext {
            z_score: Some(z),
            participants: Some(u32::try_from(participants).unwrap_or(u32::MAX)),
            ..AnomalyContext::default()
        },
        None,
    )]
}
