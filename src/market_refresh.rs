use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::fetcher::fetch_market_metadata;
use crate::state::MarketStore;
use crate::types::MarketMetadata;

/// Keeps market metadata (24h volume, liquidity, token routing) current.
pub struct MetadataRefresher {
    cfg: Config,
    store: Arc<MarketStore>,
}

impl MetadataRefresher {
    pub fn new(cfg: Config, store: Arc<MarketStore>) -> Self {
        Self { cfg, store }
    }

    /// One-shot load before the monitor starts.
    pub async fn bootstrap(&self) -> Result<usize> {
        let (markets, stats) = fetch_market_metadata(&self.cfg).await?;
        let count = markets.len();
        for meta in markets {
            self.store.upsert_metadata(meta);
        }
        info!(
            api_total = stats.api_total,
            rejected = stats.rejected_malformed,
            loaded = count,
            "Market metadata bootstrapped"
        );
        Ok(count)
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.cfg.metadata_refresh_secs.max(1)));
        ticker.tick().await; // bootstrap already ran

        loop {
            ticker.tick().await;
            match fetch_market_metadata(&self.cfg).await {
                Ok((fresh, _)) => {
                    apply_refresh(&self.store, fresh);
                }
                Err(e) => error!("Metadata refresh failed: {e}"),
            }
        }
    }
}

/// Upserts every fresh market and drops metadata for tracked markets missing
/// from the fresh set. An empty fetch removes nothing. Returns
/// `(upserted, removed)`.
pub fn apply_refresh(store: &MarketStore, fresh: Vec<MarketMetadata>) -> (usize, usize) {
    if fresh.is_empty() {
        warn!(tracked = store.market_count(), "Metadata refresh returned no markets, keeping current set");
        return (0, 0);
    }
    let fresh_ids: HashSet<String> = fresh.iter().map(|m| m.id.clone()).collect();
    let removed: Vec<String> = store
        .all_market_ids()
        .into_iter()
        .filter(|id| !fresh_ids.contains(id))
        .filter(|id| store.drop_metadata(id))
        .collect();
    let upserted = fresh.len();
    for meta in fresh {
        store.upsert_metadata(meta);
    }

    info!(
        upserted,
        removed = removed.len(),
        total = store.market_count(),
        "Metadata refresh complete"
    );
    (upserted, removed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn meta(id: &str, volume: f64) -> MarketMetadata {
        MarketMetadata {
            id: id.to_string(),
            question: format!("{id}?"),
            category: Category::Sports,
            volume,
            liquidity: 1_000.0,
            event_id: None,
            yes_token_id: Some(format!("{id}-y")),
            no_token_id: Some(format!("{id}-n")),
        }
    }

    #[test]
    fn refresh_updates_and_drops() {
        let store = MarketStore::new();
        store.upsert_metadata(meta("A", 10.0));
        store.upsert_metadata(meta("B", 10.0));

        let (upserted, removed) = apply_refresh(&store, vec![meta("A", 99.0), meta("C", 5.0)]);
        assert_eq!((upserted, removed), (2, 1));
        assert_eq!(store.get_metadata("A").map(|m| m.volume), Some(99.0));
        assert!(store.get_metadata("B").is_none());
        assert!(store.market_for_token("B-y").is_none());
        assert!(store.market_for_token("C-n").is_some());
    }

    #[test]
    fn refresh_keeps_trade_history() {
        use crate::types::{Outcome, Trade};

        let store = MarketStore::new();
        store.upsert_metadata(meta("M1", 10.0));
        let now = 1_700_000_000_000;
        store
            .ingest_trade(Trade {
                market_id: "M1".to_string(),
                outcome: Outcome::Yes,
                price: 0.5,
                size: 20.0,
                timestamp: now,
                wallet_address: None,
                transaction_hash: None,
            })
            .unwrap();

        assert_eq!(apply_refresh(&store, vec![]), (0, 0));
        assert!(store.get_metadata("M1").is_some());

        assert_eq!(apply_refresh(&store, vec![meta("M2", 5.0)]), (1, 1));
        assert!(store.get_metadata("M1").is_none());
        assert!(store.market_for_token("M1-y").is_none());
        let window = store.detection_window(now, 300_000);
        assert_eq!(window.trades_by_market.get("M1").map(Vec::len), Some(1));
    }
}
