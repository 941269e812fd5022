//! Node inventory sources.
//!
//! The inventory is read on its own, slower interval and published through a
//! `watch` channel. Each reconciliation tick reads the latest snapshot without
//! waiting on the source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use compute_events::InventorySnapshot;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Something that can describe the node pool.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn snapshot(&self) -> Result<InventorySnapshot>;
}

/// A fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    snapshot: InventorySnapshot,
}

impl StaticInventory {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// A snapshot read from a JSON file on every refresh.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InventorySource for FileInventory {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading inventory file {}", self.path.display()))?;
        let snapshot = InventorySnapshot::from_json(&json)
            .with_context(|| format!("parsing inventory file {}", self.path.display()))?;
        Ok(snapshot)
    }
}

/// Periodically refreshes the published inventory snapshot.
pub struct InventoryWorker {
    source: Arc<dyn InventorySource>,
    interval: Duration,
    publisher: watch::Sender<InventorySnapshot>,
}

impl InventoryWorker {
    pub fn new(
        source: Arc<dyn InventorySource>,
        interval: Duration,
        publisher: watch::Sender<InventorySnapshot>,
    ) -> Self {
        Self {
            source,
            interval,
            publisher,
        }
    }

    /// Read the source once and publish the result.
    ///
    /// On error the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<()> {
        let snapshot = self.source.snapshot().await?;
        debug!(nodes = snapshot.nodes.len(), "Refreshed node inventory");
        self.publisher.send_replace(snapshot);
        Ok(())
    }

    /// Run until shutdown is signaled. The first refresh happens immediately.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting inventory worker"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Inventory refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Inventory worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
