pub mod messages;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alert::engine::Clock;
use crate::error::Result;
use crate::state::market_store::MarketStore;
use crate::telemetry::FeedHealth;
use crate::types::Trade;

pub use messages::{parse_frame, FeedEvent};

/// Applies one event to the store. Returns the trade if a new fill was buffered.
///
/// Book events for tokens with no known market are ignored, as are
/// `last_trade_price` frames without a size.
pub fn apply_event(store: &MarketStore, event: FeedEvent, now: i64) -> Option<Trade> {
    match event {
        FeedEvent::BookSnapshot { asset_id, asks, bids } => {
            store.apply_book_snapshot(&asset_id, &asks, &bids);
            None
        }
        FeedEvent::BookChange { asset_id, price, is_ask, size } => {
            store.apply_book_changes(&asset_id, &[(price, is_ask, size)]);
            None
        }
        FeedEvent::LastTrade { asset_id, price, size, timestamp } => {
            let token = store.market_for_token(&asset_id)?;
            store.ingest_trade(Trade {
                market_id: token.market_id,
                outcome: token.outcome,
                price,
                size: size?,
                timestamp: timestamp.unwrap_or(now),
                wallet_address: None,
                transaction_hash: None,
            })
        }
        FeedEvent::Trade {
            market_id,
            outcome,
            price,
            size,
            timestamp,
            wallet_address,
            transaction_hash,
        } => store.ingest_trade(Trade {
            market_id,
            outcome,
            price,
            size,
            timestamp,
            wallet_address,
            transaction_hash,
        }),
    }
}

/// Replays newline-delimited feed frames from any async reader into the store.
/// Accepted trades are forwarded to the monitor for per-market alert checks.
pub struct FeedReader {
    store: Arc<MarketStore>,
    trade_tx: mpsc::Sender<Trade>,
    health: Arc<FeedHealth>,
    clock: Arc<dyn Clock>,
}

impl FeedReader {
    pub fn new(
        store: Arc<MarketStore>,
        trade_tx: mpsc::Sender<Trade>,
        health: Arc<FeedHealth>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, trade_tx, health, clock }
    }

    /// Runs until EOF. The trade channel closing is not an error; frames keep
    /// updating the store.
    pub async fn run<R>(self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut raw = Vec::new();
        let mut accepted = 0u64;
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw).await? == 0 {
                break;
            }
            // Undecodable bytes become U+FFFD and the frame fails to parse.
            let line = String::from_utf8_lossy(&raw);
            if line.trim().is_empty() {
                continue;
            }
            self.health.record_frame();
            let now = self.clock.now_ms();
            for event in parse_frame(line.trim_end()) {
                let Some(trade) = apply_event(&self.store, event, now) else {
                    continue;
                };
                accepted += 1;
                self.health.record_trade(trade.timestamp);
                debug!(market_id = %trade.market_id, outcome = %trade.outcome, price = trade.price, size = trade.size, "Trade");
                if let Err(e) = self.trade_tx.try_send(trade) {
                    warn!("trade channel full, dropping message: {e}");
                }
            }
        }
        info!(frames = self.health.frames(), trades = accepted, "Feed reached EOF");
        Ok(())
    }
}
