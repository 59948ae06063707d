use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::EPOCH_MS_CUTOFF;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMetadata {
    pub id: String,
    pub question: String,
    pub category: Category,
    /// Rolling 24h volume in USDC.
    pub volume: f64,
    pub liquidity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// CLOB token ids, used to route order-book frames to this market.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_token_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sports,
    Weather,
    Crypto,
    Politics,
    Economics,
    Other,
}

impl Category {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sports" => Category::Sports,
            "weather" => Category::Weather,
            "crypto" => Category::Crypto,
            "politics" | "elections" => Category::Politics,
            "economics" | "economy" | "finance" => Category::Economics,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Sports => "sports",
            Category::Weather => "weather",
            Category::Crypto => "crypto",
            Category::Politics => "politics",
            Category::Economics => "economics",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    #[default]
    #[serde(alias = "Yes", alias = "yes", alias = "UP", alias = "Up")]
    Yes,
    #[serde(alias = "No", alias = "no", alias = "DOWN", alias = "Down")]
    No,
}

impl Outcome {
    pub fn other(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// One executed fill. `timestamp` may arrive in seconds; see [`normalize_timestamp_ms`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub market_id: String,
    pub outcome: Outcome,
    pub price: f64,
    pub size: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl Trade {
    /// Probability of YES implied by this fill.
    pub fn yes_price(&self) -> f64 {
        match self.outcome {
            Outcome::Yes => self.price,
            Outcome::No => 1.0 - self.price,
        }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    /// Finite price in [0, 1], finite positive size, non-empty market id.
    pub fn is_well_formed(&self) -> bool {
        !self.market_id.is_empty()
            && self.price.is_finite()
            && (0.0..=1.0).contains(&self.price)
            && self.size.is_finite()
            && self.size > 0.0
    }
}

/// Seconds-vs-milliseconds heuristic: values below the 2000-01-01 ms epoch are seconds.
pub fn normalize_timestamp_ms(ts: i64) -> i64 {
    if ts < EPOCH_MS_CUTOFF {
        ts.saturating_mul(1000)
    } else {
        ts
    }
}

/// Aggregate book depth of a market at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSample {
    pub timestamp: i64,
    pub depth: f64,
}

/// Inputs for one evaluation tick. Built fresh every tick.
#[derive(Debug, Clone, Default)]
pub struct DetectionWindow {
    pub now: i64,
    pub window_ms: i64,
    pub trades_by_market: HashMap<String, Vec<Trade>>,
    pub metadata_by_market: HashMap<String, MarketMetadata>,
    /// Optional depth feed; markets without samples skip depth detection.
    pub depth_by_market: HashMap<String, Vec<DepthSample>>,
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

/// Ordinal severity. The derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Severity {
    pub const ALL: [Severity; 4] =
        [Severity::Low, Severity::Medium, Severity::High, Severity::Extreme];
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Extreme => "extreme",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyType {
    VolumeSpike,
    PriceSpike,
    FlowImbalance,
    DepthShift,
    ParticipantSpike,
    LargeTrade,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::VolumeSpike => "volume-spike",
            AnomalyType::PriceSpike => "price-spike",
            AnomalyType::FlowImbalance => "flow-imbalance",
            AnomalyType::DepthShift => "depth-shift",
            AnomalyType::ParticipantSpike => "participant-spike",
            AnomalyType::LargeTrade => "large-trade",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detector-specific measurements. Each detector fills only its own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Signed percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_in_window: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imbalance_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_size: Option<f64>,
    /// Signed percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    /// `{type}-{market_id}-{bucket_start}`; stable across ticks in the same bucket.
    pub id: String,
    pub market_id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// 0–100, comparable across detectors.
    pub score: f64,
    pub message: String,
    pub timestamp: i64,
    pub context: AnomalyContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<AnomalyMeta>,
}

/// Coarse label for a heat score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatBand {
    Quiet,
    Active,
    Hot,
    Extreme,
}

impl std::fmt::Display for HeatBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HeatBand::Quiet => "quiet",
            HeatBand::Active => "active",
            HeatBand::Hot => "hot",
            HeatBand::Extreme => "extreme",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketHeatScore {
    pub market_id: String,
    /// Always within [0, 100].
    pub score: f64,
    pub band: HeatBand,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub anomalies: Vec<AnomalyEvent>,
    pub heat_scores: Vec<MarketHeatScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_and_millis_normalize_to_same_instant() {
        assert_eq!(normalize_timestamp_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(EPOCH_MS_CUTOFF), EPOCH_MS_CUTOFF);
    }

    #[test]
    fn severity_total_order() {
        assert!(Severity::Extreme > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        let mut sorted = vec![Severity::High, Severity::Low, Severity::Extreme, Severity::Medium];
        sorted.sort();
        assert_eq!(sorted, Severity::ALL.to_vec());
    }

    #[test]
    fn trade_deserializes_from_camel_case() {
        let raw = r#"{"marketId":"M1","outcome":"NO","price":0.4,"size":10,"timestamp":1700000000,"walletAddress":"0xabc"}"#;
        let trade: Trade = serde_json::from_str(raw).unwrap();
        assert_eq!(trade.outcome, Outcome::No);
        assert_eq!(trade.wallet_address.as_deref(), Some("0xabc"));
        assert!((trade.yes_price() - 0.6).abs() < 1e-12);
        assert!(trade.is_well_formed());
    }

    #[test]
    fn malformed_trades_are_flagged() {
        let base = Trade {
            market_id: "M1".to_string(),
            outcome: Outcome::Yes,
            price: 0.5,
            size: 1.0,
            timestamp: 0,
            wallet_address: None,
            transaction_hash: None,
        };
        assert!(base.is_well_formed());
        assert!(!Trade { price: f64::NAN, ..base.clone() }.is_well_formed());
        assert!(!Trade { price: 1.5, ..base.clone() }.is_well_formed());
        assert!(!Trade { size: 0.0, ..base.clone() }.is_well_formed());
        assert!(!Trade { size: f64::INFINITY, ..base.clone() }.is_well_formed());
        assert!(!Trade { market_id: String::new(), ..base }.is_well_formed());
    }

    #[test]
    fn anomaly_type_serializes_kebab_case() {
        let json = serde_json::to_string(&AnomalyType::ParticipantSpike).unwrap();
        assert_eq!(json, "\"participant-spike\"");
        assert_eq!(AnomalyType::VolumeSpike.to_string(), "volume-spike");
    }
}
