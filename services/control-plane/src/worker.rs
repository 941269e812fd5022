//! Reconciliation background worker.
//!
//! Runs the coordinator tick on a periodic interval. Executor calls happen
//! outside the tick: observations are collected before it and placements are
//! dispatched after it on spawned tasks. Each dispatch reports back through
//! the hand-off, and the placed replica stays bound until it does.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use compute_events::{InventorySnapshot, JobUpdate, QueueStatusSnapshot};
use compute_reconcile::ReconcileError;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::coordinator::{Coordinator, Dispatch, TickInput, DISPATCH_FAILED_MESSAGE};
use crate::executor::{Executors, TerminateRequest};
use crate::handoff::HandoffQueue;
use crate::scheduler::SchedulerDump;
use crate::sink::JobSink;

/// Upper bound on one round of executor monitoring.
pub const DEFAULT_MONITOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    pub monitor_timeout: Duration,
    pub dump_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: compute_reconcile::DEFAULT_TICK_INTERVAL,
            monitor_timeout: DEFAULT_MONITOR_TIMEOUT,
            dump_dir: std::env::temp_dir(),
        }
    }
}

/// Drives the coordinator.
pub struct ReconcileWorker {
    coordinator: Coordinator,
    executors: Executors,
    sink: Arc<dyn JobSink>,
    handoff: HandoffQueue,
    inventory: watch::Receiver<InventorySnapshot>,
    queue_status: watch::Sender<QueueStatusSnapshot>,
    config: WorkerConfig,
}

impl ReconcileWorker {
    pub fn new(
        coordinator: Coordinator,
        executors: Executors,
        sink: Arc<dyn JobSink>,
        handoff: HandoffQueue,
        inventory: watch::Receiver<InventorySnapshot>,
        queue_status: watch::Sender<QueueStatusSnapshot>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            coordinator,
            executors,
            sink,
            handoff,
            inventory,
            queue_status,
            config,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting reconciliation worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Don't immediately tick on startup - give the inventory a chance to load
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciliation worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single monitor, tick and dispatch round.
    ///
    /// If the executors cannot be read the tick is skipped: treating a
    /// missing observation set as empty would terminate every job.
    pub async fn run_once(&mut self) {
        let started = Instant::now();
        let observations =
            match tokio::time::timeout(self.config.monitor_timeout, self.executors.monitor()).await {
                Ok(Ok(observations)) => observations,
                Ok(Err(e)) => {
                    warn!(error = %e, "Executor monitoring failed, skipping tick");
                    return;
                }
                Err(_) => {
                    let e = ReconcileError::Timeout {
                        resource: "executor monitor".to_string(),
                        elapsed: started.elapsed(),
                    };
                    warn!(error = %e, "Skipping tick");
                    return;
                }
            };

        let handoff = self.handoff.swap();
        if !handoff.is_empty() {
            debug!(
                submissions = handoff.submissions.len(),
                withdrawals = handoff.withdrawals.len(),
                started = handoff.started_dispatches.len(),
                failed = handoff.failed_dispatches.len(),
                "Applying hand-off"
            );
        }

        let inventory = self.inventory.borrow().clone();
        let output = self.coordinator.tick(TickInput {
            now: Utc::now(),
            inventory: &inventory,
            observations,
            handoff,
        });

        self.queue_status.send_replace(output.queue_status);

        for dispatch in output.dispatches {
            self.spawn_dispatch(dispatch);
        }
        for request in output.terminations {
            self.spawn_termination(request);
        }
        if !output.dumps.is_empty() {
            self.write_dumps(output.dumps).await;
        }

        let stats = output.stats;
        if !stats.is_idle() {
            info!(
                submitted = stats.submitted,
                placed = stats.placed,
                pruned_replicas = stats.pruned_replicas,
                pruned_nodes = stats.pruned_nodes,
                terminated = stats.terminated,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Reconciliation tick complete"
            );
        }
    }

    fn spawn_dispatch(&self, dispatch: Dispatch) {
        let executor = self.executors.for_backend(dispatch.job.backend).clone();
        let sink = self.sink.clone();
        let handoff = self.handoff.clone();

        tokio::spawn(async move {
            let Dispatch { job, rank, node } = dispatch;
            let Err(e) = executor.start_scheduled_replica(&job, rank, &node).await else {
                handoff.report_dispatch_started(job.job_id, rank);
                return;
            };

            warn!(job_id = %job.job_id, rank, node = %node, error = %e, "Failed to start replica");
            let message = JobUpdate::message(&job.job_id, format!("{DISPATCH_FAILED_MESSAGE}: {e}"));
            if let Err(e) = sink.publish(vec![message]) {
                warn!(job_id = %job.job_id, error = %e, "Failed to publish dispatch failure");
            }

            handoff.report_dispatch_failure(job.job_id.clone());
            let request = TerminateRequest {
                job,
                is_cleanup: false,
            };
            if let Err(e) = executor.terminate(&request).await {
                error!(job_id = %request.job.job_id, error = %e, "Failed to terminate job");
            }
        });
    }

    fn spawn_termination(&self, request: TerminateRequest) {
        let executor = self.executors.for_backend(request.job.backend).clone();

        tokio::spawn(async move {
            debug!(job_id = %request.job.job_id, is_cleanup = request.is_cleanup, "Terminating job");
            if let Err(e) = executor.terminate(&request).await {
                error!(job_id = %request.job.job_id, error = %e, "Failed to terminate job");
            }
        });
    }

    async fn write_dumps(&self, dumps: Vec<SchedulerDump>) {
        for dump in dumps {
            let path = self.config.dump_dir.join(format!("scheduler-{}.json", dump.name));
            let json = match serde_json::to_vec_pretty(&dump) {
                Ok(json) => json,
                Err(e) => {
                    error!(scheduler = %dump.name, error = %e, "Failed to serialize scheduler dump");
                    continue;
                }
            };

            match tokio::fs::write(&path, json).await {
                Ok(()) => info!(scheduler = %dump.name, path = %path.display(), "Wrote scheduler dump"),
                Err(e) => error!(path = %path.display(), error = %e, "Failed to write scheduler dump"),
            }
        }
    }
}
