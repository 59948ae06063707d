use std::collections::HashMap;

use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::stats::percentile_rank;
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyMeta, AnomalyType};

/// Large trade: a single fill whose notional is a meaningful share of the
/// market's liquidity. Needs metadata; one event per qualifying fill, keyed by
/// transaction hash. Without a hash the key is the fill's timestamp, outcome,
/// size and price, suffixed with an ordinal for identical fills.
///
/// Score mapping: `min(100, share_of_liquidity% * 5)`.
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let Some(meta) = w.metadata else {
        return Vec::new();
    };
    if !(meta.liquidity > 0.0) {
        return Vec::new();
    }

    let notionals: Vec<f64> = w.trades.iter().map(|t| t.notional()).collect();
    let mut events = Vec::new();
    let mut unhashed: HashMap<String, usize> = HashMap::new();

    for t in w.current_trades() {
        let notional = t.notional();
        if notional < cfg.large_trade_min_notional {
            continue;
        }
        let share = notional / meta.liquidity * 100.0;
        let Some(severity) = cfg.large_trade_liquidity_pct.classify(share) else {
            continue;
        };

        let key = match t.transaction_hash.as_deref() {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ => {
                let base = format!("{}-{}-{}-{}", t.timestamp, t.outcome, t.size, t.price);
                let seen = unhashed.entry(base.clone()).or_insert(0);
                *seen += 1;
                match *seen {
                    1 => base,
                    n => format!("{base}-{n}"),
                }
            }
        };
        let rank = percentile_rank(&notionals, notional).unwrap_or(100.0);
        let message = format!(
            "Large {} fill on {}: ${notional:.0} ({share:.1}% of liquidity, p{rank:.0} of recent fills)",
            t.outcome,
            w.label(),
        );

        events.push(w.event(
            format!("{}-{}-{key}", AnomalyType::LargeTrade.as_str(), w.market_id),
            AnomalyType::LargeTrade,
            severity,
            share * 5.0,
            message,
            t.timestamp,
            AnomalyContext {
                trade_size: Some(t.size),
                volume_in_window: Some(notional),
                ..AnomalyContext::default()
            },
            t.wallet_address
                .as_ref()
                .map(|wallet| AnomalyMeta { wallet: Some(wallet.clone()) }),
        ));
    }
    events
}
