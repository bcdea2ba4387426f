/// LinkStone Server Binary
///
/// Serves token issuance and redirects over HTTP, backed by the storage
/// engine chosen on the command line.

use anyhow::Context;
use clap::Parser;
use lstone_core::ExpirySweeper;
use lstone_server::{metrics, router, AppState, Args};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often the purge gauge is refreshed from the sweeper
const PURGE_GAUGE_REFRESH: Duration = Duration::from_secs(5);

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Default to info level, override with RUST_LOG
    // Example: RUST_LOG=lstone_core=trace cargo run --bin lstone-server
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    metrics::register_metrics();
    info!("Initialized Prometheus metrics");

    let config = args
        .to_config()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    info!(
        backend = config.backend.kind(),
        token_length = config.token_length,
        budget_ms = config.budget.as_millis() as u64,
        "Opening storage backend"
    );
    let state = AppState::new(config, &args.public_url()).context("failed to open backend")?;

    // Periodic purge of expired records
    let sweeper = args.sweep_interval().map(|interval| {
        let mut sweeper = ExpirySweeper::new(Arc::clone(&state.backend), interval);
        sweeper.start();
        Arc::new(sweeper)
    });
    let gauge_task = sweeper.clone().map(|sweeper| {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_GAUGE_REFRESH);
            loop {
                ticker.tick().await;
                metrics::PURGED_RECORDS.set(sweeper.purged().min(i64::MAX as u64) as i64);
            }
        })
    });

    let addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("LinkStone listening on http://{}", addr);
    info!("Short links are issued under {}", state.public_url);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = gauge_task {
        task.abort();
        let _ = task.await;
    }
    // Last handle; dropping it joins the worker thread
    drop(sweeper);

    info!("Server stopped");
    Ok(())
}
