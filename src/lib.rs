pub mod alert;
pub mod config;
pub mod detector;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod market_refresh;
pub mod monitor;
pub mod scorer;
pub mod state;
pub mod stats;
pub mod telemetry;
pub mod types;
