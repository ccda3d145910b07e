use anyhow::{Context, Result};
use collector::{BinanceFetcher, CollectionPlan, FetcherSettings, RoundScheduler};
use shared::{get_db_connection, Config, MySqlCandleStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting kline collector...");

    let config = Config::from_env().context("invalid configuration")?;
    let plan = CollectionPlan::resolve(&config.collector.timeframes)
        .context("invalid timeframe schedule")?;
    info!("Symbols: {}", config.collector.symbols.join(", "));
    info!(
        "Polling every {:?}, {} candles per fetch",
        config.collector.poll_interval, config.collector.fetch_limit
    );

    let db = get_db_connection(&config.database_url).await?;
    let store = Arc::new(MySqlCandleStore::new(db));
    let fetcher = BinanceFetcher::new(FetcherSettings::from(&config.collector))
        .context("failed to build HTTP client")?;

    let scheduler = RoundScheduler::new(&config.collector, plan, store, Arc::new(fetcher));
    info!("Schedule: {}", scheduler.plan());
    scheduler.prepare().await.context("failed to create kline tables")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing the current entry...");
        let _ = stop_tx.send(true);
        // Keep the sender alive until the scheduler has seen the request.
        stop_tx.closed().await;
    });

    scheduler.run(stop_rx).await;
    info!("Collector stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
