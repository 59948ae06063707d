use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::types::Severity;

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Short detection window (5 minutes).
pub const DEFAULT_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Baseline length as a multiple of the short window (6 × 5m = 30m).
pub const DEFAULT_BASELINE_MULTIPLIER: u32 = 6;

/// Anything below this is a seconds timestamp (2000-01-01T00:00:00Z in ms).
pub const EPOCH_MS_CUTOFF: i64 = 946_684_800_000;

/// Alert re-evaluation cadence (seconds).
pub const TICK_INTERVAL_SECS: u64 = 5;

/// Metadata refresh interval (seconds).
pub const METADATA_REFRESH_INTERVAL_SECS: u64 = 300;

/// Ticks between alert re-syncs from the alert store; 0 disables.
pub const ALERT_SYNC_TICKS: u64 = 6;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Anomaly history retained by the monitor (events).
pub const ANOMALY_HISTORY_CAPACITY: usize = 500;

/// Price band around the mid used for the depth metric.
pub const DEPTH_PRICE_BAND: f64 = 0.05;

// ---------------------------------------------------------------------------
// Detection tunables
// ---------------------------------------------------------------------------

/// Four ascending cutoffs. A metric strictly above a cutoff earns that severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub extreme: f64,
}

impl SeverityBands {
    pub const fn new(low: f64, medium: f64, high: f64, extreme: f64) -> Self {
        Self { low, medium, high, extreme }
    }

    /// Highest band whose cutoff `value` exceeds, or None below `low`.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if !value.is_finite() {
            return None;
        }
        if value > self.extreme {
            Some(Severity::Extreme)
        } else if value > self.high {
            Some(Severity::High)
        } else if value > self.medium {
            Some(Severity::Medium)
        } else if value > self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub extreme: f64,
}

impl HeatWeights {
    /// Negative weights would break monotonicity, so they count as zero.
    pub fn weight(&self, severity: Severity) -> f64 {
        let w = match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Extreme => self.extreme,
        };
        if w.is_finite() { w.max(0.0) } else { 0.0 }
    }
}

/// Lower bounds of the upper three heat bands; `Quiet` covers everything below `active`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatBandThresholds {
    pub active: f64,
    pub hot: f64,
    pub extreme: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub window_ms: i64,
    pub baseline_multiplier: u32,
    /// Minimum samples before any z-score based detector fires.
    pub min_samples: usize,
    /// z-score cutoffs for volume spikes.
    pub volume_z: SeverityBands,
    /// Absolute percent price change cutoffs.
    pub price_change_pct: SeverityBands,
    /// Flow imbalance percent cutoffs.
    pub flow_imbalance_pct: SeverityBands,
    /// Absolute percent depth change cutoffs.
    pub depth_change_pct: SeverityBands,
    /// z-score cutoffs for distinct-wallet spikes.
    pub participant_z: SeverityBands,
    /// Trade notional as percent of market liquidity.
    pub large_trade_liquidity_pct: SeverityBands,
    /// Trades below this notional are never large trades.
    pub large_trade_min_notional: f64,
    pub heat_weights: HeatWeights,
    pub heat_bands: HeatBandThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            baseline_multiplier: DEFAULT_BASELINE_MULTIPLIER,
            min_samples: 3,
            volume_z: SeverityBands::new(1.5, 2.0, 3.0, 4.0),
            price_change_pct: SeverityBands::new(3.0, 5.0, 10.0, 20.0),
            flow_imbalance_pct: SeverityBands::new(60.0, 70.0, 80.0, 90.0),
            depth_change_pct: SeverityBands::new(20.0, 35.0, 50.0, 70.0),
            participant_z: SeverityBands::new(1.5, 2.0, 3.0, 4.0),
            large_trade_liquidity_pct: SeverityBands::new(2.0, 5.0, 10.0, 20.0),
            large_trade_min_notional: 500.0,
            heat_weights: HeatWeights { low: 5.0, medium: 15.0, high: 30.0, extreme: 50.0 },
            heat_bands: HeatBandThresholds { active: 20.0, hot: 50.0, extreme: 80.0 },
        }
    }
}

impl DetectionConfig {
    /// Window width actually used; a non-positive override falls back to the default.
    pub fn effective_window_ms(&self) -> i64 {
        if self.window_ms > 0 { self.window_ms } else { DEFAULT_WINDOW_MS }
    }

    /// Total lookback needed: baseline buckets plus the current window.
    pub fn lookback_ms(&self) -> i64 {
        self.lookback_ms_for(self.effective_window_ms())
    }

    pub fn lookback_ms_for(&self, window_ms: i64) -> i64 {
        window_ms * (i64::from(self.baseline_multiplier.max(1)) + 1)
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Service config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub log_level: String,
    /// JSON file holding the persisted alert list (ALERTS_PATH)
    pub alerts_path: Option<String>,
    /// Optional JSON override for the detection tunables (DETECTION_CONFIG_PATH)
    pub detection_config_path: Option<String>,
    /// Newline-delimited feed frames; stdin when unset (FEED_PATH)
    pub feed_path: Option<String>,
    pub tick_interval_secs: u64,
    pub metadata_refresh_secs: u64,
    /// 0 disables the Gamma metadata bootstrap (METADATA_MAX_MARKETS)
    pub metadata_max_markets: usize,
    pub webhook_timeout_secs: u64,
    /// Ticks between alert store reloads; 0 loads only at startup (ALERT_SYNC_TICKS)
    pub alert_sync_ticks: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            alerts_path: non_empty_var("ALERTS_PATH"),
            detection_config_path: non_empty_var("DETECTION_CONFIG_PATH"),
            feed_path: non_empty_var("FEED_PATH"),
            tick_interval_secs: parse_var("TICK_INTERVAL_SECS", TICK_INTERVAL_SECS)?,
            metadata_refresh_secs: parse_var(
                "METADATA_REFRESH_SECS",
                METADATA_REFRESH_INTERVAL_SECS,
            )?,
            metadata_max_markets: parse_var("METADATA_MAX_MARKETS", 200)?,
            webhook_timeout_secs: parse_var("WEBHOOK_TIMEOUT_SECS", 5)?,
            alert_sync_ticks: parse_var("ALERT_SYNC_TICKS", ALERT_SYNC_TICKS)?,
        })
    }

    pub fn detection_config(&self) -> Result<DetectionConfig> {
        match &self.detection_config_path {
            Some(path) => DetectionConfig::from_json_file(path),
            None => Ok(DetectionConfig::default()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
