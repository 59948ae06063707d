use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alert::engine::{AlertEngine, Clock};
use crate::alert::store::AlertStore;
use crate::alert::types::TickOutcome;
use crate::config::{DetectionConfig, ALERT_SYNC_TICKS, ANOMALY_HISTORY_CAPACITY};
use crate::detector::{compute_market_anomalies, diff_anomalies, sort_anomalies, AnomalyDiff};
use crate::error::{AppError, Result};
use crate::state::MarketStore;
use crate::telemetry::{FeedHealth, TickLatency};
use crate::types::{AnomalyEvent, AnomalyReport, Trade};

/// What one tick produced.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub now: i64,
    pub report: AnomalyReport,
    pub diff: AnomalyDiff,
    pub alerts: TickOutcome,
}

/// Drives detection and alert evaluation: a periodic tick over every market
/// plus a scoped alert check whenever a trade lands.
///
/// The monitor is the only writer of the alert engine. Alert store I/O runs on
/// the blocking pool; the engine mirror is re-synced every `alert_sync_every`
/// ticks.
pub struct Monitor {
    store: Arc<MarketStore>,
    cfg: DetectionConfig,
    engine: AlertEngine,
    alert_store: Arc<dyn AlertStore>,
    health: Arc<FeedHealth>,
    latency: Arc<TickLatency>,
    clock: Arc<dyn Clock>,
    previous: Vec<AnomalyEvent>,
    history: VecDeque<AnomalyEvent>,
    alert_sync_every: u64,
    ticks_since_sync: u64,
}

impl Monitor {
    pub fn new(
        store: Arc<MarketStore>,
        cfg: DetectionConfig,
        engine: AlertEngine,
        alert_store: Arc<dyn AlertStore>,
        health: Arc<FeedHealth>,
        latency: Arc<TickLatency>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cfg,
            engine,
            alert_store,
            health,
            latency,
            clock,
            previous: Vec::new(),
            history: VecDeque::with_capacity(ANOMALY_HISTORY_CAPACITY),
            alert_sync_every: ALERT_SYNC_TICKS,
            ticks_since_sync: 0,
        }
    }

    /// Reload alerts from the store every `ticks` ticks; 0 disables.
    pub fn with_alert_sync(mut self, ticks: u64) -> Self {
        self.alert_sync_every = ticks;
        self
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AlertEngine {
        &mut self.engine
    }

    /// Anomalies first seen on recent ticks, newest last.
    pub fn history(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.history.iter()
    }

    /// Runs until the trade channel closes, then evaluates one last tick.
    pub async fn run(mut self, mut trade_rx: mpsc::Receiver<Trade>, tick_every: Duration) {
        let mut ticker = interval(tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.engine.start();
        info!(alerts = self.engine.get_all_alerts().len(), every_ms = tick_every.as_millis() as u64, "Monitor running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = self.clock.now_ms();
                    let tick = self.run_tick(now);
                    self.finish_tick(&tick.alerts).await;
                }
                maybe = trade_rx.recv() => match maybe {
                    Some(trade) => {
                        let now = self.clock.now_ms();
                        let outcome = self.on_trade(&trade, now);
                        self.persist_triggers(&outcome).await;
                    }
                    None => break,
                }
            }
        }

        let now = self.clock.now_ms();
        let last = self.run_tick(now);
        self.persist_triggers(&last.alerts).await;
        self.engine.stop();
        info!(
            anomalies = last.report.anomalies.len(),
            history = self.history.len(),
            ticks = self.health.ticks(),
            "Feed closed, monitor stopped"
        );
    }

    /// One full pass: refresh buffers, detect, diff against the previous tick,
    /// then evaluate every alert against a single snapshot. Triggers are not
    /// persisted here; see [`Monitor::finish_tick`].
    pub fn run_tick(&mut self, now: i64) -> TickReport {
        let started = Instant::now();
        let window_ms = self.cfg.effective_window_ms();

        self.store.prune(now, self.cfg.lookback_ms());
        self.store.sample_depth(now);

        let window = self.store.detection_window(now, window_ms);
        let mut report = compute_market_anomalies(&window, &self.cfg);
        sort_anomalies(&mut report.anomalies);
        let diff = diff_anomalies(&self.previous, &report.anomalies);
        self.record_anomalies(&diff);

        let snapshot = self.store.snapshot(now, window_ms);
        let alerts = self.engine.evaluate_tick(&snapshot);

        self.previous = report.anomalies.clone();
        self.health.record_tick(now);
        self.latency.record(started.elapsed());

        debug!(
            markets = snapshot.len(),
            anomalies = report.anomalies.len(),
            added = diff.added.len(),
            cleared = diff.cleared.len(),
            alerts_evaluated = alerts.evaluated,
            alerts_triggered = alerts.triggers.len(),
            "Tick"
        );

        TickReport { now, report, diff, alerts }
    }

    /// Alerts scoped to the trade's market, evaluated against fresh metrics.
    pub fn on_trade(&mut self, trade: &Trade, now: i64) -> TickOutcome {
        let snapshot = self
            .store
            .snapshot_market(&trade.market_id, now, self.cfg.effective_window_ms());
        self.engine.evaluate_market(&snapshot, &trade.market_id)
    }

    /// Persist the tick's triggers, then re-sync alerts if due.
    pub async fn finish_tick(&mut self, outcome: &TickOutcome) {
        self.persist_triggers(outcome).await;
        if self.alert_sync_every == 0 {
            return;
        }
        self.ticks_since_sync += 1;
        if self.ticks_since_sync < self.alert_sync_every {
            return;
        }
        self.ticks_since_sync = 0;
        match self.sync_alerts().await {
            Ok(count) => debug!(alerts = count, "Alerts re-synced from store"),
            Err(e) => warn!("Alert re-sync failed, keeping current alerts: {e}"),
        }
    }

    /// Replace the engine's alerts with the store's current list.
    pub async fn sync_alerts(&mut self) -> Result<usize> {
        let store = Arc::clone(&self.alert_store);
        let alerts = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| AppError::Store(format!("alert load task failed: {e}")))??;
        let count = alerts.len();
        self.engine.replace_all(alerts);
        Ok(count)
    }

    fn record_anomalies(&mut self, diff: &AnomalyDiff) {
        for a in &diff.added {
            info!(
                event = "ANOMALY",
                anomaly_type = %a.anomaly_type,
                market_id = %a.market_id,
                severity = %a.severity,
                score = a.score,
                "{}", a.message
            );
            if self.history.len() == ANOMALY_HISTORY_CAPACITY {
                self.history.pop_front();
            }
            self.history.push_back(a.clone());
        }
        for a in &diff.cleared {
            debug!(event = "ANOMALY_CLEARED", id = %a.id, market_id = %a.market_id);
        }
    }

    async fn persist_triggers(&self, outcome: &TickOutcome) {
        if outcome.triggers.is_empty() {
            return;
        }
        let store = Arc::clone(&self.alert_store);
        let stamps: Vec<(String, i64)> = outcome
            .triggers
            .iter()
            .map(|t| (t.alert_id.clone(), t.triggered_at))
            .collect();
        let joined = tokio::task::spawn_blocking(move || {
            for (alert_id, triggered_at) in stamps {
                if let Err(e) = store.record_trigger(&alert_id, triggered_at) {
                    warn!(alert_id = %alert_id, "Failed to persist trigger: {e}");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Trigger persistence task failed: {e}");
        }
    }
}
