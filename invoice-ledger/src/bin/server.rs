//! Invoice ledger server binary

use anyhow::Context;
use invoice_ledger::{Config, Ledger};
use std::time::Duration;

const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting invoice ledger server");

    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("reading LEDGER_* environment")?,
    };
    let metrics_interval = metrics_interval()?;

    let ledger = Ledger::open(config).await.context("opening ledger")?;
    let stats = ledger.stats()?;
    tracing::info!(
        data_dir = ?ledger.config().data_dir,
        receipts = stats.total_receipts,
        blocks = stats.total_blocks,
        "Ledger ready"
    );

    let mut ticker = tokio::time::interval(metrics_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = ledger.stats()?;
                tracing::info!(
                    receipts = stats.total_receipts,
                    blocks = stats.total_blocks,
                    records = stats.total_records,
                    "Ledger stats"
                );
                tracing::debug!(metrics = %ledger.metrics().encode(), "Metrics snapshot");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    tracing::info!("Shutting down ledger server");
    tracing::info!(metrics = %ledger.metrics().encode(), "Final metrics");
    ledger.shutdown().await?;
    Ok(())
}

fn metrics_interval() -> anyhow::Result<Duration> {
    let secs = match std::env::var("LEDGER_METRICS_INTERVAL_SECS") {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("LEDGER_METRICS_INTERVAL_SECS={}", value))?,
        Err(_) => DEFAULT_METRICS_INTERVAL_SECS,
    };
    anyhow::ensure!(secs > 0, "LEDGER_METRICS_INTERVAL_SECS must be positive");
    Ok(Duration::from_secs(secs))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LEDGER_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
