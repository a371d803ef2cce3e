//! Flash sale simulation.
//!
//! Seeds a few items, lets a burst of concurrent buyers race for them through
//! the admission runtime, then drains the workers and prints what sold.

mod config;
mod simulation;

use chrono::Utc;
use config::Config;
use flashsale_runtime::WorkerExit;
use flashsale_runtime::metrics::describe_metrics;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flash_sale=info,flashsale_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    describe_metrics();

    info!("Starting flash sale simulation");

    let config = Config::from_env();
    info!(
        backend = ?config.demo.backend,
        items = config.demo.items,
        stock = config.demo.stock,
        buyers = config.demo.buyers,
        "Configuration loaded"
    );

    let items = simulation::seed_items(&config, Utc::now());
    let wiring = simulation::wire(&config, &items).await?;
    info!(items = items.len(), "Items seeded");

    let attempts = tokio::select! {
        attempts = simulation::burst(&wiring.sale, &items, &config) => Some(attempts),
        () = shutdown_signal() => None,
    };

    // Drain every worker before reading outcomes
    for (item_id, exit) in wiring.sale.shutdown().await {
        match exit {
            WorkerExit::Finished(report) => info!(
                item_id = %item_id,
                processed = report.processed,
                succeeded = report.succeeded,
                closed = report.closed,
                failed = report.failed,
                "Worker drained"
            ),
            WorkerExit::Failed => error!(item_id = %item_id, "Worker failed"),
            WorkerExit::TimedOut => warn!(item_id = %item_id, "Worker timed out and was aborted"),
        }
    }

    match attempts {
        Some(attempts) => simulation::report(&wiring, &items, &attempts).await,
        None => warn!("Simulation interrupted before every buyer finished"),
    }

    info!("Flash sale simulation finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
