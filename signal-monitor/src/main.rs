use anyhow::Result;
use common::{Clock, SystemClock};
use data_ingestion::{MetaApiClient, PostgresSignalStore, SignalIngestor};
use signal_monitor::{load_config, SignalMonitor};
use signal_rules::{ActiveSignalProcessor, SignalRuleEngine, SignalStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("SIGNAL_MONITOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("signal-monitor.toml"));
    let config = load_config(Some(&config_path))?;

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(config.level()).init();

    info!("🚀 Starting Signal Monitor");

    let store = PostgresSignalStore::new(&config.database_url, config.max_connections).await?;
    store.init_tables().await?;
    let store: Arc<dyn SignalStore> = Arc::new(store);
    info!("✅ Connected to signal store");

    let prices = Arc::new(MetaApiClient::new(config.metaapi.clone())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = Arc::new(SignalRuleEngine::standard(&config.rules));
    info!("Rule chain: {}", engine.rule_names().join(" -> "));

    let processor = Arc::new(ActiveSignalProcessor::new(
        store.clone(),
        engine,
        clock.clone(),
        config.processor.clone(),
    ));
    let ingestor = SignalIngestor::new(
        store.clone(),
        processor.clone(),
        clock.clone(),
        config.webhooks.clone(),
    );
    let monitor = Arc::new(SignalMonitor::new(
        store,
        prices,
        clock,
        config.monitor.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = tokio::spawn({
        let monitor = monitor.clone();
        let shutdown = shutdown_rx.clone();
        async move { monitor.run(shutdown).await }
    });

    let maintenance_handle = tokio::spawn({
        let processor = processor.clone();
        let mut shutdown = shutdown_rx.clone();
        let every = Duration::from_secs(config.processor.maintenance_interval_secs.max(1));
        async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = processor.run_maintenance().await;
                        info!(
                            "🧹 Maintenance: {} processed, {} resolved, {} cross-resolved, {} errors",
                            report.processed, report.resolved, report.cross_resolved, report.errors
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }
    });

    // Webhook events arrive one per line on stdin as `<path> <json body>`
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_line(&ingestor, &line).await,
                    Ok(None) => {
                        info!("Webhook feed closed, monitoring continues");
                        stdin_open = false;
                    }
                    Err(e) => {
                        error!("Failed to read webhook feed: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Shutting down gracefully...");
                break;
            }
        }
    }

    shutdown_tx.send(true).ok();
    monitor_handle.await?;
    maintenance_handle.await?;

    Ok(())
}

async fn handle_line(ingestor: &SignalIngestor, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some((path, body)) = line.split_once(char::is_whitespace) else {
        warn!("Ignoring webhook line without a body: {}", line);
        return;
    };

    match ingestor.ingest(path, body.trim()).await {
        Ok(outcome) if outcome.processing.success => info!(
            "✅ {} {} processed (swing {:?}, resolved {})",
            outcome.signal.unique_key,
            outcome.signal.action,
            outcome.signal.swing,
            outcome.signal.resolved
        ),
        Ok(outcome) => warn!(
            "{} {} rejected: {}",
            outcome.signal.unique_key, outcome.signal.action, outcome.processing.message
        ),
        Err(e) => warn!("Webhook {} rejected: {}", path, e),
    }
}
