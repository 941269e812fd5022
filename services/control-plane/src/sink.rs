//! Job state sinks.
//!
//! A sink receives bounded batches of [`JobUpdate`]s from the reconciliation
//! tick. Publishing never blocks on the job-management API: the HTTP sink
//! hands batches to a background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use compute_events::JobUpdate;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Destination for job updates.
pub trait JobSink: Send + Sync {
    /// Queue a batch for delivery. An error means the batch was not accepted.
    fn publish(&self, updates: Vec<JobUpdate>) -> Result<()>;
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Serialize)]
struct BulkRequest<'a> {
    items: &'a [JobUpdate],
}

/// Client for the job-management API's bulk update endpoint.
#[derive(Clone)]
pub struct JobApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl JobApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Post one batch of updates.
    pub async fn push_updates(&self, items: &[JobUpdate]) -> Result<()> {
        let url = format!("{}/jobs/control/update", self.base_url);
        debug!(url = %url, count = items.len(), "Pushing job updates");

        let response = self
            .client
            .post(&url)
            .json(&BulkRequest { items })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to push job updates");
            anyhow::bail!("Failed to push job updates: {} - {}", status, body);
        }

        Ok(())
    }
}

/// Sink that delivers batches to the job-management API in the background.
pub struct HttpJobSink {
    tx: mpsc::UnboundedSender<Vec<JobUpdate>>,
}

impl HttpJobSink {
    /// Start the delivery task.
    ///
    /// The task ends once the sink is dropped and every queued batch has been
    /// attempted.
    pub fn spawn(client: JobApiClient) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<JobUpdate>>();

        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                if let Err(e) = client.push_updates(&batch).await {
                    warn!(error = %e, count = batch.len(), "Dropping job update batch");
                }
            }
            debug!("Job update delivery task finished");
        });

        (Self { tx }, handle)
    }
}

impl JobSink for HttpJobSink {
    fn publish(&self, updates: Vec<JobUpdate>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.tx
            .send(updates)
            .map_err(|_| anyhow!("job update delivery task has stopped"))
    }
}

// =============================================================================
// Log
// =============================================================================

/// Sink used when no job-management API is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl JobSink for LogSink {
    fn publish(&self, updates: Vec<JobUpdate>) -> Result<()> {
        for update in updates {
            info!(
                job_id = %update.job_id,
                state = ?update.state,
                status = ?update.status,
                assigned_nodes = ?update.assigned_nodes,
                "Job update"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Recording
// =============================================================================

/// In-memory sink that keeps every batch it accepts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<JobUpdate>>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<JobUpdate>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every accepted update in publish order.
    pub fn updates(&self) -> Vec<JobUpdate> {
        self.batches().into_iter().flatten().collect()
    }

    /// Accepted updates for one job.
    pub fn updates_for(&self, job_id: &str) -> Vec<JobUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.job_id == job_id)
            .collect()
    }

    pub fn clear(&self) {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl JobSink for RecordingSink {
    fn publish(&self, updates: Vec<JobUpdate>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("recording sink configured to fail");
        }
        if updates.is_empty() {
            return Ok(());
        }
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(updates);
        Ok(())
    }
}
