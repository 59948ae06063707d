use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use polymarket_pulse::alert::{
    ActionWorker, AlertEngine, AlertStore, ChannelDispatcher, Clock, InMemoryAlertStore,
    JsonFileAlertStore, SystemClock,
};
use polymarket_pulse::config::{Config, CHANNEL_CAPACITY};
use polymarket_pulse::error::Result;
use polymarket_pulse::feed::FeedReader;
use polymarket_pulse::market_refresh::MetadataRefresher;
use polymarket_pulse::monitor::Monitor;
use polymarket_pulse::state::MarketStore;
use polymarket_pulse::telemetry::{FeedHealth, TickLatency};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let detection = cfg.detection_config()?;
    info!(
        window_ms = detection.effective_window_ms(),
        baseline_multiplier = detection.baseline_multiplier,
        "Detection config loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MarketStore::new();
    let health = Arc::new(FeedHealth::new());
    let latency = Arc::new(TickLatency::new());

    // --- Market metadata ---
    if cfg.metadata_max_markets > 0 {
        let refresher = MetadataRefresher::new(cfg.clone(), Arc::clone(&store));
        if let Err(e) = refresher.bootstrap().await {
            warn!("Metadata bootstrap failed, continuing with feed-only markets: {e}");
        }
        tokio::spawn(async move { refresher.run().await });
    } else {
        info!("METADATA_MAX_MARKETS=0, Gamma bootstrap disabled");
    }

    // --- Alerts ---
    let alert_store: Arc<dyn AlertStore> = match &cfg.alerts_path {
        Some(path) => Arc::new(JsonFileAlertStore::new(path)),
        None => {
            warn!("ALERTS_PATH not set, alerts live in memory only");
            Arc::new(InMemoryAlertStore::default())
        }
    };

    let (action_tx, action_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let worker = ActionWorker::new(action_rx, Duration::from_secs(cfg.webhook_timeout_secs))?;
    let worker_handle = tokio::spawn(async move { worker.run().await });

    let engine = AlertEngine::new(Box::new(ChannelDispatcher::new(action_tx)), Arc::clone(&clock));

    // --- Feed ---
    let (trade_tx, trade_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let reader = FeedReader::new(Arc::clone(&store), trade_tx, Arc::clone(&health), Arc::clone(&clock));
    let feed_handle = match cfg.feed_path.clone() {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            info!("Replaying feed from {path}");
            tokio::spawn(async move { reader.run(BufReader::new(file)).await })
        }
        None => {
            info!("Reading feed frames from stdin");
            tokio::spawn(async move { reader.run(BufReader::new(tokio::io::stdin())).await })
        }
    };

    // --- Monitor ---
    let mut monitor = Monitor::new(
        Arc::clone(&store),
        detection,
        engine,
        alert_store,
        Arc::clone(&health),
        Arc::clone(&latency),
        clock,
    )
    .with_alert_sync(cfg.alert_sync_ticks);
    let loaded = monitor.sync_alerts().await?;
    info!(alerts = loaded, sync_every_ticks = cfg.alert_sync_ticks, "Alerts loaded");
    let tick_every = Duration::from_secs(cfg.tick_interval_secs.max(1));

    let interrupted = tokio::select! {
        _ = monitor.run(trade_rx, tick_every) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Interrupted, stopping feed");
        feed_handle.abort();
    } else {
        match feed_handle.await {
            Ok(Err(e)) => warn!("Feed reader stopped with error: {e}"),
            Err(e) => warn!("Feed reader task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
    // Monitor dropped its dispatcher; the worker drains what is queued and exits.
    if let Err(e) = worker_handle.await {
        warn!("Action worker task failed: {e}");
    }

    if let Some(s) = latency.summary() {
        info!(
            p50_us = s.p50_us,
            p95_us = s.p95_us,
            p99_us = s.p99_us,
            ticks = s.samples,
            markets = store.market_count(),
            trades = health.trades(),
            "Tick latency"
        );
    }
    Ok(())
}
