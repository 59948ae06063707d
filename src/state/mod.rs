pub mod market_store;
pub mod snapshot;

pub use market_store::MarketStore;
pub use snapshot::{MarketMetrics, MarketSnapshot};
