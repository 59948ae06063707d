//! Feed and tick freshness. A silent feed is not an error, so staleness is
//! exposed here for whoever wants to surface it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct FeedHealth {
    /// Epoch ms of the last accepted trade (0 = none).
    last_trade_at_ms: AtomicI64,
    /// Epoch ms of the last completed tick (0 = none).
    last_tick_at_ms: AtomicI64,
    frames: AtomicU64,
    trades: AtomicU64,
    ticks: AtomicU64,
}

impl FeedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade(&self, at_ms: i64) {
        self.trades.fetch_add(1, Ordering::Relaxed);
        self.last_trade_at_ms.fetch_max(at_ms, Ordering::Relaxed);
    }

    pub fn record_tick(&self, at_ms: i64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn last_trade_at_ms(&self) -> Option<i64> {
        Some(self.last_trade_at_ms.load(Ordering::Relaxed)).filter(|&t| t > 0)
    }

    pub fn last_tick_at_ms(&self) -> Option<i64> {
        Some(self.last_tick_at_ms.load(Ordering::Relaxed)).filter(|&t| t > 0)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn trades(&self) -> u64 {
        self.trades.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// True when no trade has arrived within `max_age_ms` of `now`.
    pub fn is_stale(&self, now: i64, max_age_ms: i64) -> bool {
        self.last_trade_at_ms().map_or(true, |t| now - t > max_age_ms)
    }
}
