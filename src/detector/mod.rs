//! Anomaly detectors.
//!
//! Each detector is a pure function over one market's [`MarketWindow`]. The
//! aggregator sanitizes and sorts trades before handing them out, so detectors
//! can slice by time with binary search.

pub mod aggregate;
pub mod depth;
pub mod flow;
pub mod large_trade;
pub mod participants;
pub mod price;
pub mod volume;

pub use aggregate::{compute_market_anomalies, diff_anomalies, filter_min_severity, sort_anomalies, AnomalyDiff};

use crate::config::DetectionConfig;
use crate::types::{
    AnomalyContext, AnomalyEvent, AnomalyMeta, AnomalyType, DepthSample, MarketMetadata, Severity,
    Trade,
};

/// One market's slice of a tick: trades and depth samples sorted ascending by time,
/// all at or before `now` and inside the lookback.
#[derive(Debug, Clone, Copy)]
pub struct MarketWindow<'a> {
    pub market_id: &'a str,
    pub trades: &'a [Trade],
    pub metadata: Option<&'a MarketMetadata>,
    pub depth: &'a [DepthSample],
    pub now: i64,
    pub window_ms: i64,
}

impl<'a> MarketWindow<'a> {
    pub fn window_start(&self) -> i64 {
        self.now - self.window_ms
    }

    /// Trades with `start < timestamp <= end`.
    pub fn trades_between(&self, start: i64, end: i64) -> &'a [Trade] {
        let lo = self.trades.partition_point(|t| t.timestamp <= start);
        let hi = self.trades.partition_point(|t| t.timestamp <= end).max(lo);
        &self.trades[lo..hi]
    }

    /// Trades inside the short window `(now - window_ms, now]`.
    pub fn current_trades(&self) -> &'a [Trade] {
        self.trades_between(self.window_start(), self.now)
    }

    /// The `multiplier` window-sized buckets immediately preceding the short window,
    /// most recent first. Empty buckets are kept so quiet periods count as zero.
    pub fn baseline_buckets(&self, multiplier: u32) -> Vec<&'a [Trade]> {
        (1..=i64::from(multiplier.max(1)))
            .map(|k| {
                let end = self.now - k * self.window_ms;
                self.trades_between(end - self.window_ms, end)
            })
            .collect()
    }

    /// Depth samples with `start < timestamp <= end`.
    pub fn depth_between(&self, start: i64, end: i64) -> &'a [DepthSample] {
        let lo = self.depth.partition_point(|s| s.timestamp <= start);
        let hi = self.depth.partition_point(|s| s.timestamp <= end).max(lo);
        &self.depth[lo..hi]
    }

    /// Start of the window-aligned bucket containing `now`.
    pub fn bucket_start(&self) -> i64 {
        self.now.div_euclid(self.window_ms) * self.window_ms
    }

    pub fn anomaly_id(&self, kind: AnomalyType) -> String {
        format!("{}-{}-{}", kind.as_str(), self.market_id, self.bucket_start())
    }

    /// Short market label for messages: the question when known, else the id.
    pub fn label(&self) -> &'a str {
        match self.metadata {
            Some(m) if !m.question.is_empty() => m.question.as_str(),
            _ => self.market_id,
        }
    }

    pub fn window_minutes(&self) -> i64 {
        (self.window_ms / 60_000).max(1)
    }

    #[allow(clippy::too_many_arguments)]
    fn event(
        &self,
        id: String,
        kind: AnomalyType,
        severity: Severity,
        score: f64,
        message: String,
        timestamp: i64,
        context: AnomalyContext,
        meta: Option<AnomalyMeta>,
    ) -> AnomalyEvent {
        AnomalyEvent {
            id,
            market_id: self.market_id.to_string(),
            anomaly_type: kind,
            severity,
            score: clamp_score(score),
            message,
            timestamp,
            context,
            meta,
        }
    }
}

/// Squashes a raw detector magnitude into [0, 100]. Non-finite scores become 0.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub type DetectorFn = fn(&MarketWindow<'_>, &DetectionConfig) -> Vec<AnomalyEvent>;

/// Registry entry for one detector.
pub struct Detector {
    pub kind: AnomalyType,
    /// Skipped when the market has no metadata.
    pub needs_metadata: bool,
    pub run: DetectorFn,
}

pub const DETECTORS: &[Detector] = &[
    Detector { kind: AnomalyType::VolumeSpike, needs_metadata: false, run: volume::detect },
    Detector { kind: AnomalyType::PriceSpike, needs_metadata: false, run: price::detect },
    Detector { kind: AnomalyType::FlowImbalance, needs_metadata: false, run: flow::detect },
    Detector { kind: AnomalyType::DepthShift, needs_metadata: false, run: depth::detect },
    Detector {
        kind: AnomalyType::ParticipantSpike,
        needs_metadata: false,
        run: participants::detect,
    },
    Detector { kind: AnomalyType::LargeTrade, needs_metadata: true, run: large_trade::detect },
];
