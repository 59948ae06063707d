use std::collections::HashMap;

use crate::alert::evaluator::MetricSource;
use crate::alert::types::ConditionMetric;
use crate::error::MetricError;
use crate::types::Outcome;

/// Derived alert inputs for one market. `None` means the feed has not delivered
/// that metric yet (e.g. order book not loaded).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketMetrics {
    pub yes_price: Option<f64>,
    pub no_price: Option<f64>,
    /// Rolling 24h volume from metadata.
    pub volume_24h: Option<f64>,
    /// Latest sampled book depth near the mid.
    pub depth: Option<f64>,
    /// YES book spread as percent of mid.
    pub spread_pct: Option<f64>,
    /// Signed YES-vs-NO flow imbalance percent over the short window.
    pub flow: Option<f64>,
}

/// Frozen view of every market's metrics for one evaluation tick, so all alerts
/// in the tick see the same values.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub taken_at: i64,
    metrics: HashMap<String, MarketMetrics>,
}

impl MarketSnapshot {
    pub fn new(taken_at: i64, metrics: HashMap<String, MarketMetrics>) -> Self {
        Self { taken_at, metrics }
    }

    pub fn get(&self, market_id: &str) -> Option<&MarketMetrics> {
        self.metrics.get(market_id)
    }

    pub fn insert(&mut self, market_id: impl Into<String>, metrics: MarketMetrics) {
        self.metrics.insert(market_id.into(), metrics);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl MetricSource for MarketSnapshot {
    fn metric(&self, market_id: &str, metric: &ConditionMetric) -> Result<f64, MetricError> {
        let m = self
            .metrics
            .get(market_id)
            .ok_or_else(|| MetricError::UnknownMarket(market_id.to_string()))?;
        let value = match metric {
            ConditionMetric::Price { outcome: Outcome::Yes } => m.yes_price,
            ConditionMetric::Price { outcome: Outcome::No } => m.no_price,
            ConditionMetric::Volume => m.volume_24h,
            ConditionMetric::Depth => m.depth,
            ConditionMetric::Spread => m.spread_pct,
            ConditionMetric::Flow => m.flow,
        };
        value.ok_or_else(|| MetricError::Unavailable {
            market_id: market_id.to_string(),
            metric: metric.to_string(),
        })
    }

    fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.metrics.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
