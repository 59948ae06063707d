use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Alert store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Raised by a `MetricSource` when a market has no value for a metric yet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("no data for market {0}")]
    UnknownMarket(String),

    #[error("{metric} not available for market {market_id}")]
    Unavailable { market_id: String, metric: String },
}

/// Per-action delivery failure. Reported on the trigger, never retried in-tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("action queue full")]
    QueueFull,

    #[error("action queue closed")]
    QueueClosed,

    #[error("invalid action config: {0}")]
    InvalidConfig(String),

    #[error("action rejected: {0}")]
    Rejected(String),
}
