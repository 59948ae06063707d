use super::MarketWindow;
use crate::config::DetectionConfig;
use crate::types::{AnomalyContext, AnomalyEvent, AnomalyType};

/// First and last fill are both needed to measure a move.
const MIN_PRICE_TRADES: usize = 2;

/// Price spike: percent move of the implied YES probability between the first
/// and last fill of the short window. NO fills are mirrored (`1 - price`) so
/// both sides of the book land on one scale.
///
/// Score mapping: `min(100, |change%| * 5)`, so a 20% move saturates.
pub fn detect(w: &MarketWindow<'_>, cfg: &DetectionConfig) -> Vec<AnomalyEvent> {
    let current = w.current_trades();
    if current.len() < MIN_PRICE_TRADES {
        return Vec::new();
    }
    let (Some(first), Some(last)) = (current.first(), current.last()) else {
        return Vec::new();
    };

    let start = first.yes_price();
    let end = last.yes_price();
    if !(start > 0.0) {
        return Vec::new();
    }
    let change = (end - start) / start * 100.0;
    let Some(severity) = cfg.price_change_pct.classify(change.abs()) else {
        return Vec::new();
    };

    let direction = if change >= 0.0 { "up" } else { "down" };
    let message = format!(
        "YES price {direction} {:.1}% on {} in {}m ({:.3} -> {:.3})",
        change.abs(),
        w.label(),
        w.window_minutes(),
        start,
        end,
    );

    vec![w.event(
        w.anomaly_id(AnomalyType::PriceSpike),
        AnomalyType::PriceSpike,
        severity,
        change.abs() * 5.0,
        message,
        last.timestamp,
        AnomalyContext { price_change: Some(change), ..AnomalyContext::default() },
        None,
    )]
}
