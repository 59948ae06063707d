pub mod health;
pub mod latency;

pub use health::FeedHealth;
pub use latency::{LatencySummary, TickLatency};
