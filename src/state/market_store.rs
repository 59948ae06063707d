use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::DEPTH_PRICE_BAND;
use crate::detector::flow::FlowSplit;
use crate::state::snapshot::{MarketMetrics, MarketSnapshot};
use crate::types::{normalize_timestamp_ms, DepthSample, DetectionWindow, MarketMetadata, Outcome, Trade};

// ---------------------------------------------------------------------------
// OrderBook
// ---------------------------------------------------------------------------

/// Per-token order book. Prices are stored as integer keys: `(price * 10_000).round() as u32`.
/// This avoids floating-point map keys while supporting 4 decimal places of precision.
///
/// For asks, `BTreeMap::keys().next()` is O(log n) and gives the minimum (best ask).
/// For bids, `BTreeMap::keys().next_back()` gives the maximum (best bid).
#[derive(Debug, Default)]
struct OrderBook {
    /// price_key → size. Sorted ascending; minimum key = best ask.
    asks: BTreeMap<u32, f64>,
    /// price_key → size. Sorted ascending; maximum key = best bid.
    bids: BTreeMap<u32, f64>,
}

impl OrderBook {
    #[inline]
    fn price_key(price: f64) -> u32 {
        (price * 10_000.0).round() as u32
    }

    #[inline]
    fn key_to_price(key: u32) -> f64 {
        key as f64 / 10_000.0
    }

    fn apply_snapshot(&mut self, asks: &[(f64, f64)], bids: &[(f64, f64)]) {
        self.asks.clear();
        for &(price, size) in asks {
            if size > 0.0 {
                self.asks.insert(Self::price_key(price), size);
            }
        }
        self.bids.clear();
        for &(price, size) in bids {
            if size > 0.0 {
                self.bids.insert(Self::price_key(price), size);
            }
        }
    }

    /// `is_ask`: true = SELL side (ask), false = BUY side (bid).
    fn apply_change(&mut self, price: f64, is_ask: bool, size: f64) {
        let key = Self::price_key(price);
        let map = if is_ask { &mut self.asks } else { &mut self.bids };
        if size <= 0.0 {
            map.remove(&key);
        } else {
            map.insert(key, size);
        }
    }

    fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|&k| Self::key_to_price(k))
    }

    fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|&k| Self::key_to_price(k))
    }

    fn mid(&self) -> Option<f64> {
        Some((self.best_ask()? + self.best_bid()?) / 2.0)
    }

    /// Bid/ask spread as a percent of the mid.
    fn spread_pct(&self) -> Option<f64> {
        let (ask, bid) = (self.best_ask()?, self.best_bid()?);
        let mid = (ask + bid) / 2.0;
        (mid > 0.0).then(|| (ask - bid) / mid * 100.0)
    }

    /// Resting size on both sides within `band` of the mid.
    fn depth_within(&self, band: f64) -> Option<f64> {
        let mid = self.mid()?;
        let lo = Self::price_key((mid - band).max(0.0));
        let hi = Self::price_key(mid + band);
        let asks: f64 = self.asks.range(..=hi).map(|(_, s)| s).sum();
        let bids: f64 = self.bids.range(lo..).map(|(_, s)| s).sum();
        Some(asks + bids)
    }
}

/// Maps token_id → market for routing book and trade frames.
#[derive(Debug, Clone)]
pub struct TokenMarketRef {
    pub market_id: String,
    pub outcome: Outcome,
}

/// Latest fill price per outcome with its trade timestamp.
#[derive(Debug, Clone, Copy, Default)]
struct LastPrices {
    yes: Option<(f64, i64)>,
    no: Option<(f64, i64)>,
}

impl LastPrices {
    /// Out-of-order fills older than the recorded one are ignored.
    fn record(&mut self, outcome: Outcome, price: f64, timestamp: i64) {
        let slot = match outcome {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        };
        if slot.map_or(true, |(_, at)| timestamp >= at) {
            *slot = Some((price, timestamp));
        }
    }

    fn price(&self, outcome: Outcome) -> Option<f64> {
        match outcome {
            Outcome::Yes => self.yes.map(|(p, _)| p),
            Outcome::No => self.no.map(|(p, _)| p),
        }
    }
}

// ---------------------------------------------------------------------------
// MarketStore
// ---------------------------------------------------------------------------

/// Live market state fed by the inbound feed and read once per tick.
///
/// Trade buffers keep only the detection lookback; call [`MarketStore::prune`]
/// every tick.
pub struct MarketStore {
    /// market_id → metadata
    metadata: DashMap<String, MarketMetadata>,
    /// asset_id → (market_id, outcome)
    token_to_market: DashMap<String, TokenMarketRef>,
    /// asset_id → live order book
    token_books: DashMap<String, OrderBook>,
    /// market_id → recent trades, oldest first
    trades: DashMap<String, VecDeque<Trade>>,
    /// market_id → depth samples, oldest first
    depth: DashMap<String, VecDeque<DepthSample>>,
    /// market_id → last fill price per outcome
    last_prices: DashMap<String, LastPrices>,
}

impl MarketStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upsert_metadata(&self, meta: MarketMetadata) {
        for (token, outcome) in [(&meta.yes_token_id, Outcome::Yes), (&meta.no_token_id, Outcome::No)] {
            if let Some(token) = token {
                self.token_books.entry(token.clone()).or_default();
                self.token_to_market.insert(
                    token.clone(),
                    TokenMarketRef { market_id: meta.id.clone(), outcome },
                );
            }
        }
        self.metadata.insert(meta.id.clone(), meta);
    }

    /// Forget a market's metadata and token routing. Buffered trades, depth
    /// samples and last prices stay until the lookback prune ages them out.
    pub fn drop_metadata(&self, market_id: &str) -> bool {
        let Some((_, meta)) = self.metadata.remove(market_id) else {
            return false;
        };
        for token in [meta.yes_token_id, meta.no_token_id].into_iter().flatten() {
            self.token_to_market.remove(&token);
            self.token_books.remove(&token);
        }
        true
    }

    pub fn get_metadata(&self, market_id: &str) -> Option<MarketMetadata> {
        self.metadata.get(market_id).map(|m| m.clone())
    }

    pub fn market_for_token(&self, asset_id: &str) -> Option<TokenMarketRef> {
        self.token_to_market.get(asset_id).map(|r| r.clone())
    }

    /// Buffers a trade. Returns the normalized trade, or None if it was malformed
    /// or a repeat of an already-buffered fill.
    pub fn ingest_trade(&self, mut trade: Trade) -> Option<Trade> {
        if !trade.is_well_formed() {
            return None;
        }
        trade.timestamp = normalize_timestamp_ms(trade.timestamp);

        let mut buf = self.trades.entry(trade.market_id.clone()).or_default();
        if trade.transaction_hash.is_some()
            && buf.iter().rev().any(|t| {
                t.transaction_hash == trade.transaction_hash
                    && t.outcome == trade.outcome
                    && t.size == trade.size
            })
        {
            return None;
        }
        buf.push_back(trade.clone());
        drop(buf);

        self.last_prices
            .entry(trade.market_id.clone())
            .or_default()
            .record(trade.outcome, trade.price, trade.timestamp);
        Some(trade)
    }

    /// Apply a full book snapshot for a token.
    ///
    /// `asks`/`bids` are `(price, size)` pairs; size=0 levels are skipped.
    /// Returns `(best_ask, best_bid)` if the token is known and the book is not empty.
    pub fn apply_book_snapshot(
        &self,
        asset_id: &str,
        asks: &[(f64, f64)],
        bids: &[(f64, f64)],
    ) -> Option<(f64, f64)> {
        if !self.token_to_market.contains_key(asset_id) {
            return None;
        }
        let mut book = self.token_books.entry(asset_id.to_string()).or_default();
        book.apply_snapshot(asks, bids);
        let best_ask = book.best_ask().unwrap_or(0.0);
        let best_bid = book.best_bid().unwrap_or(0.0);
        (best_ask > 0.0 || best_bid > 0.0).then_some((best_ask, best_bid))
    }

    /// Apply incremental order-level changes for a token.
    ///
    /// `changes` are `(price, is_ask, size)` where `is_ask=true` is the SELL side.
    /// Returns `(best_ask, best_bid)` after applying all changes.
    pub fn apply_book_changes(
        &self,
        asset_id: &str,
        changes: &[(f64, bool, f64)],
    ) -> Option<(f64, f64)> {
        if !self.token_to_market.contains_key(asset_id) {
            return None;
        }
        let mut book = self.token_books.entry(asset_id.to_string()).or_default();
        for &(price, is_ask, size) in changes {
            book.apply_change(price, is_ask, size);
        }
        Some((book.best_ask().unwrap_or(0.0), book.best_bid().unwrap_or(0.0)))
    }

    /// Records one depth sample per market whose YES book has both sides.
    pub fn sample_depth(&self, now: i64) {
        let samples: Vec<(String, f64)> = self
            .metadata
            .iter()
            .filter_map(|entry| {
                let token = entry.value().yes_token_id.as_ref()?;
                let depth = self.token_books.get(token)?.depth_within(DEPTH_PRICE_BAND)?;
                Some((entry.key().clone(), depth))
            })
            .collect();
        for (market_id, depth) in samples {
            self.depth
                .entry(market_id)
                .or_default()
                .push_back(DepthSample { timestamp: now, depth });
        }
    }

    /// Drops trades and depth samples at or before `now - lookback_ms`.
    /// Markets left with an empty trade buffer are removed from the buffer map.
    pub fn prune(&self, now: i64, lookback_ms: i64) {
        let cutoff = now - lookback_ms;
        for mut buf in self.trades.iter_mut() {
            while buf.front().is_some_and(|t| t.timestamp <= cutoff) {
                buf.pop_front();
            }
        }
        self.trades.retain(|_, buf| !buf.is_empty());
        for mut buf in self.depth.iter_mut() {
            while buf.front().is_some_and(|s| s.timestamp <= cutoff) {
                buf.pop_front();
            }
        }
        self.depth.retain(|_, buf| !buf.is_empty());
    }

    /// Inputs for one detection tick. Every market with buffered trades is included.
    pub fn detection_window(&self, now: i64, window_ms: i64) -> DetectionWindow {
        DetectionWindow {
            now,
            window_ms,
            trades_by_market: self
                .trades
                .iter()
                .map(|e| (e.key().clone(), e.value().iter().cloned().collect()))
                .collect(),
            metadata_by_market: self
                .metadata
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            depth_by_market: self
                .depth
                .iter()
                .map(|e| (e.key().clone(), e.value().iter().copied().collect()))
                .collect(),
        }
    }

    /// Alert metrics for every known market, captured in one pass.
    pub fn snapshot(&self, now: i64, window_ms: i64) -> MarketSnapshot {
        let ids = self.known_market_ids();
        let metrics = ids
            .into_iter()
            .map(|id| {
                let m = self.metrics_for(&id, now, window_ms);
                (id, m)
            })
            .collect();
        MarketSnapshot::new(now, metrics)
    }

    /// Same as [`MarketStore::snapshot`] restricted to one market.
    pub fn snapshot_market(&self, market_id: &str, now: i64, window_ms: i64) -> MarketSnapshot {
        let mut metrics = HashMap::new();
        if self.metadata.contains_key(market_id) || self.trades.contains_key(market_id) {
            metrics.insert(market_id.to_string(), self.metrics_for(market_id, now, window_ms));
        }
        MarketSnapshot::new(now, metrics)
    }

    fn metrics_for(&self, market_id: &str, now: i64, window_ms: i64) -> MarketMetrics {
        let meta = self.metadata.get(market_id).map(|m| m.clone());
        let book_for = |token: &Option<String>| {
            token.as_ref().and_then(|t| self.token_books.get(t))
        };

        let (yes_mid, spread_pct) = match meta.as_ref().and_then(|m| book_for(&m.yes_token_id)) {
            Some(book) => (book.mid(), book.spread_pct()),
            None => (None, None),
        };
        let no_mid = meta.as_ref().and_then(|m| book_for(&m.no_token_id)).and_then(|b| b.mid());
        let last = self.last_prices.get(market_id).map(|l| *l).unwrap_or_default();

        let yes_direct = yes_mid.or(last.price(Outcome::Yes));
        let no_direct = no_mid.or(last.price(Outcome::No));
        let yes_price = yes_direct.or(no_direct.map(|p| 1.0 - p));
        let no_price = no_direct.or(yes_direct.map(|p| 1.0 - p));

        let flow = self.trades.get(market_id).and_then(|buf| {
            let recent: Vec<Trade> = buf
                .iter()
                .filter(|t| t.timestamp > now - window_ms && t.timestamp <= now)
                .cloned()
                .collect();
            FlowSplit::of(&recent).signed_imbalance_pct()
        });

        let depth = self.depth.get(market_id).and_then(|d| d.back().map(|s| s.depth));

        MarketMetrics {
            yes_price,
            no_price,
            volume_24h: meta.as_ref().map(|m| m.volume).filter(|v| v.is_finite()),
            depth,
            spread_pct,
            flow,
        }
    }

    fn known_market_ids(&self) -> Vec<String> {
        let mut ids: HashSet<String> = self.metadata.iter().map(|e| e.key().clone()).collect();
        ids.extend(self.trades.iter().map(|e| e.key().clone()));
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort_unstable();
        ids
    }

    pub fn market_count(&self) -> usize {
        self.metadata.len()
    }

    /// Markets with at least one buffered trade.
    pub fn active_market_count(&self) -> usize {
        self.trades.len()
    }

    pub fn all_market_ids(&self) -> Vec<String> {
        self.metadata.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for MarketStore {
    fn default() -> Self {
        Self {
            metadata: DashMap::new(),
            token_to_market: DashMap::new(),
            token_books: DashMap::new(),
            trades: DashMap::new(),
            depth: DashMap::new(),
            last_prices: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::evaluator::MetricSource;
    use crate::alert::types::ConditionMetric;
    use crate::error::MetricError;
    use crate::types::Category;

    const NOW: i64 = 1_700_000_000_000;

    fn test_market() -> MarketMetadata {
        MarketMetadata {
            id: "market1".to_string(),
            question: "Test".to_string(),
            category: Category::Other,
            volume: 12_345.0,
            liquidity: 5_000.0,
            event_id: None,
            yes_token_id: Some("yes1".to_string()),
            no_token_id: Some("no1".to_string()),
        }
    }

    fn fill(outcome: Outcome, price: f64, size: f64, ts: i64) -> Trade {
        Trade {
            market_id: "market1".to_string(),
            outcome,
            price,
            size,
            timestamp: ts,
            wallet_address: None,
            transaction_hash: None,
        }
    }

    #[test]
    fn snapshot_sets_best_ask_and_bid() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());

        let (best_ask, best_bid) = store
            .apply_book_snapshot("yes1", &[(0.55, 100.0), (0.60, 50.0)], &[(0.54, 200.0), (0.50, 75.0)])
            .expect("known token");
        assert!((best_ask - 0.55).abs() < 1e-6, "best_ask={best_ask}");
        assert!((best_bid - 0.54).abs() < 1e-6, "best_bid={best_bid}");
    }

    #[test]
    fn price_change_removes_level_and_updates_best_ask() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());
        store.apply_book_snapshot("yes1", &[(0.55, 100.0), (0.60, 50.0)], &[]);

        let (best_ask, _) = store.apply_book_changes("yes1", &[(0.55, true, 0.0)]).unwrap();
        assert!((best_ask - 0.60).abs() < 1e-6, "best_ask should have moved to 0.60, got {best_ask}");
    }

    #[test]
    fn unknown_token_returns_none() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());
        assert!(store.apply_book_snapshot("unknown_token", &[(0.55, 100.0)], &[]).is_none());
    }

    #[test]
    fn seconds_timestamps_normalized_on_ingest() {
        let store = MarketStore::new();
        let t = store.ingest_trade(fill(Outcome::Yes, 0.5, 1.0, 1_700_000_000)).unwrap();
        assert_eq!(t.timestamp, 1_700_000_000_000);
        assert!(store.ingest_trade(fill(Outcome::Yes, f64::NAN, 1.0, NOW)).is_none());
    }

    #[test]
    fn repeated_fill_is_buffered_once() {
        let store = MarketStore::new();
        let mut t = fill(Outcome::Yes, 0.5, 3.0, NOW);
        t.transaction_hash = Some("0xdup".to_string());
        assert!(store.ingest_trade(t.clone()).is_some());
        assert!(store.ingest_trade(t).is_none());
        let window = store.detection_window(NOW, 300_000);
        assert_eq!(window.trades_by_market["market1"].len(), 1);
    }

    #[test]
    fn prune_drops_old_trades_and_empty_markets() {
        let store = MarketStore::new();
        store.ingest_trade(fill(Outcome::Yes, 0.5, 1.0, NOW - 10_000));
        store.ingest_trade(fill(Outcome::Yes, 0.5, 1.0, NOW - 1_000));
        store.prune(NOW, 5_000);
        assert_eq!(store.detection_window(NOW, 300_000).trades_by_market["market1"].len(), 1);
        store.prune(NOW + 10_000, 5_000);
        assert_eq!(store.active_market_count(), 0);
    }

    #[test]
    fn snapshot_derives_alert_metrics() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());
        store.apply_book_snapshot("yes1", &[(0.62, 100.0), (0.90, 10.0)], &[(0.58, 200.0)]);
        store.sample_depth(NOW - 1_000);
        store.ingest_trade(fill(Outcome::Yes, 0.60, 30.0, NOW - 2_000));
        store.ingest_trade(fill(Outcome::No, 0.40, 10.0, NOW - 1_000));

        let snap = store.snapshot(NOW, 300_000);
        let price = snap.metric("market1", &ConditionMetric::Price { outcome: Outcome::Yes }).unwrap();
        assert!((price - 0.60).abs() < 1e-9);
        let no_price = snap.metric("market1", &ConditionMetric::Price { outcome: Outcome::No }).unwrap();
        assert!((no_price - 0.40).abs() < 1e-9);
        let spread = snap.metric("market1", &ConditionMetric::Spread).unwrap();
        assert!((spread - 0.04 / 0.60 * 100.0).abs() < 1e-6);
        assert_eq!(snap.metric("market1", &ConditionMetric::Volume).unwrap(), 12_345.0);
        // 0.90 ask sits outside the band around the 0.60 mid.
        assert_eq!(snap.metric("market1", &ConditionMetric::Depth).unwrap(), 300.0);
        assert_eq!(snap.metric("market1", &ConditionMetric::Flow).unwrap(), 50.0);
    }

    #[test]
    fn late_older_fill_keeps_newer_price() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());
        store.ingest_trade(fill(Outcome::Yes, 0.80, 5.0, NOW - 1_000));
        store.ingest_trade(fill(Outcome::Yes, 0.20, 5.0, NOW - 200_000));

        let snap = store.snapshot(NOW, 300_000);
        let price = snap.metric("market1", &ConditionMetric::Price { outcome: Outcome::Yes }).unwrap();
        assert!((price - 0.80).abs() < 1e-9, "price={price}");
        assert_eq!(store.detection_window(NOW, 300_000).trades_by_market["market1"].len(), 2);
    }

    #[test]
    fn missing_book_is_unavailable_not_fatal() {
        let store = MarketStore::new();
        store.upsert_metadata(test_market());
        let snap = store.snapshot(NOW, 300_000);
        assert!(matches!(
            snap.metric("market1", &ConditionMetric::Spread),
            Err(MetricError::Unavailable { .. })
        ));
        assert!(matches!(
            snap.metric("nope", &ConditionMetric::Volume),
            Err(MetricError::UnknownMarket(_))
        ));
    }
}
