//! Compute Control Plane
//!
//! The control plane places jobs onto the node pool and keeps their recorded
//! state in line with what the execution backends report. It provides the
//! REST API for submissions and drives the reconciliation loop.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use compute_control_plane::{
    api,
    config,
    coordinator::Coordinator,
    executor::{Executors, InMemoryExecutor},
    handoff::HandoffQueue,
    inventory::{FileInventory, InventorySource, InventoryWorker, StaticInventory},
    scheduler::SchedulerSet,
    sink::{HttpJobSink, JobApiClient, JobSink, LogSink},
    state::AppState,
    worker::{ReconcileWorker, WorkerConfig},
};
use compute_events::{InventorySnapshot, QueueStatusSnapshot};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to COMPUTE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting compute control plane");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let products = config.load_products()?;
    let classes: Option<BTreeSet<String>> = (!products.is_empty())
        .then(|| products.iter().map(|p| p.resource_class.clone()).collect());
    let schedulers = match &classes {
        Some(classes) => SchedulerSet::with_classes(config.policy.clone(), classes.iter().cloned()),
        None => SchedulerSet::new(config.policy.clone()),
    };
    info!(products = products.len(), "Product catalog loaded");

    // Job state sink
    let (sink, sink_handle): (Arc<dyn JobSink>, _) = match &config.job_api_url {
        Some(url) => {
            info!(url = %url, "Publishing job updates to job API");
            let (sink, handle) = HttpJobSink::spawn(JobApiClient::new(url)?);
            (Arc::new(sink) as Arc<dyn JobSink>, Some(handle))
        }
        None => {
            warn!("No job API configured, job updates are only logged");
            (Arc::new(LogSink) as Arc<dyn JobSink>, None)
        }
    };

    // Inventory source
    let source: Arc<dyn InventorySource> = match &config.inventory_file {
        Some(path) => Arc::new(FileInventory::new(path)),
        None => {
            warn!("No inventory file configured, node pool is empty");
            Arc::new(StaticInventory::default())
        }
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (inventory_tx, inventory_rx) = watch::channel(InventorySnapshot::default());
    let (status_tx, status_rx) = watch::channel(QueueStatusSnapshot::default());
    let handoff = HandoffQueue::new();

    // Start inventory worker in background
    let inventory_worker = InventoryWorker::new(source, config.inventory_interval, inventory_tx);
    let inventory_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            inventory_worker.run(shutdown_rx).await;
        }
    });

    // Start reconciliation worker in background
    let coordinator = Coordinator::new(
        schedulers,
        products,
        config.coordinator_settings(),
        sink.clone(),
    );
    let reconcile_worker = ReconcileWorker::new(
        coordinator,
        Executors::single(Arc::new(InMemoryExecutor::new())),
        sink,
        handoff.clone(),
        inventory_rx,
        status_tx,
        WorkerConfig {
            interval: config.tick_interval,
            dump_dir: config.dump_dir.clone(),
            ..WorkerConfig::default()
        },
    );
    let reconcile_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconcile_worker.run(shutdown_rx).await;
        }
    });

    // Create application state
    let state = AppState::new(handoff, status_rx, classes);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, reconcile_handle).await {
        warn!(error = %e, "Reconciliation worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, inventory_handle).await {
        warn!(error = %e, "Inventory worker did not shut down in time");
    }

    // The sink task drains once the last sender is dropped with the worker.
    if let Some(handle) = sink_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Job update sink did not drain in time");
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
