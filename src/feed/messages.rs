use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

use crate::types::Outcome;

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Numeric field that may arrive as a JSON number or a decimal string.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum Num {
    Float(f64),
    Text(String),
}

impl Num {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Num::Float(v) => Some(*v),
            Num::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        self.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
struct RawLevel {
    price: Num,
    size: Num,
}

#[derive(Debug, Deserialize, Clone)]
struct RawPriceChange {
    asset_id: String,
    price: Num,
    size: Num,
    side: String,
}

/// Trade payload of the `activity` topic. Timestamps are epoch seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct RawActivityTrade {
    condition_id: String,
    outcome: Outcome,
    price: Num,
    size: Num,
    timestamp: Num,
    #[serde(default)]
    proxy_wallet: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
}

/// Superset of every frame shape the feed carries; each event type fills a subset.
#[derive(Debug, Deserialize)]
struct RawMsg {
    event_type: Option<String>,
    asset_id: Option<String>,
    asks: Option<Vec<RawLevel>>,
    bids: Option<Vec<RawLevel>>,
    price_changes: Option<Vec<RawPriceChange>>,
    price: Option<Num>,
    size: Option<Num>,
    timestamp: Option<Num>,
    /// `activity` frames only.
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<RawActivityTrade>,
}

/// Parsed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full book for one token, as `(price, size)` levels.
    BookSnapshot {
        asset_id: String,
        asks: Vec<(f64, f64)>,
        bids: Vec<(f64, f64)>,
    },
    /// One level changed. `size == 0` removes the level.
    BookChange {
        asset_id: String,
        price: f64,
        is_ask: bool,
        size: f64,
    },
    /// Market-channel fill keyed by token; the caller resolves the market.
    LastTrade {
        asset_id: String,
        price: f64,
        size: Option<f64>,
        timestamp: Option<i64>,
    },
    /// Activity fill, already keyed by market.
    Trade {
        market_id: String,
        outcome: Outcome,
        price: f64,
        size: f64,
        timestamp: i64,
        wallet_address: Option<String>,
        transaction_hash: Option<String>,
    },
}

fn levels(raw: Option<Vec<RawLevel>>) -> Vec<(f64, f64)> {
    raw.unwrap_or_default()
        .iter()
        .filter_map(|l| Some((l.price.as_f64()?, l.size.as_f64()?)))
        .collect()
}

/// Parse one feed line into zero or more events.
///
/// A line is a single JSON object or an array of them. Market-channel objects
/// carry `event_type` (`book`, `price_change`, `last_trade_price`); activity
/// frames carry `topic: "activity"` with a trade `payload`.
pub fn parse_frame(raw: &str) -> Vec<FeedEvent> {
    let msgs: Vec<RawMsg> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        match serde_json::from_str::<RawMsg>(raw) {
            Ok(m) => vec![m],
            Err(_) => vec![],
        }
    };

    if msgs.is_empty() {
        let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 10 || count % 1000 == 0 {
            let end = (0..=raw.len().min(500)).rev().find(|&i| raw.is_char_boundary(i)).unwrap_or(0);
            warn!(count, "[FEED PARSE] unrecognized frame: {}", &raw[..end]);
        }
        return vec![];
    }

    let mut events = Vec::new();
    for msg in msgs {
        expand_raw_msg(msg, &mut events);
    }
    events
}

fn expand_raw_msg(msg: RawMsg, out: &mut Vec<FeedEvent>) {
    if msg.topic.as_deref() == Some("activity") {
        if !matches!(msg.kind.as_deref(), None | Some("trades") | Some("orders_matched")) {
            return;
        }
        if let Some(t) = msg.payload {
            let (Some(price), Some(size), Some(timestamp)) =
                (t.price.as_f64(), t.size.as_f64(), t.timestamp.as_i64())
            else {
                return;
            };
            out.push(FeedEvent::Trade {
                market_id: t.condition_id,
                outcome: t.outcome,
                price,
                size,
                timestamp,
                wallet_address: t.proxy_wallet,
                transaction_hash: t.transaction_hash,
            });
        }
        return;
    }

    match msg.event_type.as_deref() {
        Some("book") => {
            if let Some(asset_id) = msg.asset_id {
                out.push(FeedEvent::BookSnapshot {
                    asset_id,
                    asks: levels(msg.asks),
                    bids: levels(msg.bids),
                });
            }
        }
        Some("price_change") => {
            for entry in msg.price_changes.unwrap_or_default() {
                if let (Some(price), Some(size)) = (entry.price.as_f64(), entry.size.as_f64()) {
                    out.push(FeedEvent::BookChange {
                        asset_id: entry.asset_id,
                        price,
                        is_ask: entry.side == "SELL",
                        size,
                    });
                }
            }
        }
        Some("last_trade_price") => {
            if let (Some(asset_id), Some(price)) = (msg.asset_id, msg.price.as_ref().and_then(Num::as_f64)) {
                out.push(FeedEvent::LastTrade {
                    asset_id,
                    price,
                    size: msg.size.as_ref().and_then(Num::as_f64),
                    timestamp: msg.timestamp.as_ref().and_then(Num::as_i64),
                });
            }
        }
        _ => {}
    }
}
