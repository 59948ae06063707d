use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{Category, MarketMetadata};

const PAGE_SIZE: usize = 500;

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub rejected_malformed: usize,
    pub accepted: usize,
}

/// Fetch active market metadata from the Gamma REST API, highest 24h volume
/// first, stopping at `metadata_max_markets`.
pub async fn fetch_market_metadata(cfg: &Config) -> Result<(Vec<MarketMetadata>, FetchStats)> {
    let mut stats = FetchStats::default();
    if cfg.metadata_max_markets == 0 {
        return Ok((Vec::new(), stats));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut markets = Vec::new();
    let mut offset = 0usize;

    'outer: loop {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}&order=volume24hr&ascending=false",
            cfg.gamma_api_url, PAGE_SIZE, offset
        );

        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;
        let Some(items) = resp.as_array() else {
            return Err(AppError::Bootstrap(
                "GAMMA /markets response was not an array".to_string(),
            ));
        };
        if items.is_empty() {
            break;
        }
        stats.api_total += items.len();

        for item in items {
            match parse_gamma_market(item) {
                Some(meta) => {
                    markets.push(meta);
                    if markets.len() >= cfg.metadata_max_markets {
                        break 'outer;
                    }
                }
                None => stats.rejected_malformed += 1,
            }
        }

        if items.len() < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }

    stats.accepted = markets.len();
    debug!(?stats, "Gamma metadata fetched");
    Ok((markets, stats))
}

fn number(v: &serde_json::Value, key: &str) -> Option<f64> {
    let x = v.get(key)?;
    x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok()))
}

/// Parse one Gamma market object. None when it has no condition id.
///
/// Token ids and outcome labels arrive as JSON-encoded string arrays. Markets
/// whose outcomes are not a YES/NO pair keep their metadata but get no token
/// routing.
pub fn parse_gamma_market(v: &serde_json::Value) -> Option<MarketMetadata> {
    let id = v.get("conditionId")?.as_str()?.to_string();
    if id.is_empty() {
        return None;
    }

    let token_ids: Vec<String> = v
        .get("clobTokenIds")
        .and_then(|s| s.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let outcomes: Vec<String> = v
        .get("outcomes")
        .and_then(|s| s.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    let yes_idx = outcomes.iter().position(|o| o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up"));
    let no_idx = outcomes.iter().position(|o| o.eq_ignore_ascii_case("No") || o.eq_ignore_ascii_case("Down"));
    let (yes_token_id, no_token_id) = match (yes_idx, no_idx) {
        (Some(y), Some(n)) => (token_ids.get(y).cloned(), token_ids.get(n).cloned()),
        _ if outcomes.len() == 2 && token_ids.len() == 2 => {
            (Some(token_ids[0].clone()), Some(token_ids[1].clone()))
        }
        _ => (None, None),
    };

    let category = v
        .get("category")
        .and_then(|c| c.as_str())
        .or_else(|| {
            v.get("events")
                .and_then(|e| e.as_array())
                .and_then(|a| a.first())
                .and_then(|e| e.get("category"))
                .and_then(|c| c.as_str())
        })
        .map(Category::parse)
        .unwrap_or(Category::Other);

    let event_id = v
        .get("events")
        .and_then(|e| e.as_array())
        .and_then(|a| a.first())
        .and_then(|e| e.get("id"))
        .and_then(|i| i.as_str().map(str::to_string).or_else(|| i.as_u64().map(|n| n.to_string())));

    Some(MarketMetadata {
        id,
        question: v.get("question").and_then(|q| q.as_str()).unwrap_or("").to_string(),
        category,
        volume: number(v, "volume24hr").unwrap_or(0.0),
        liquidity: number(v, "liquidityNum").or_else(|| number(v, "liquidity")).unwrap_or(0.0),
        event_id,
        yes_token_id,
        no_token_id,
    })
}
