//! The reconciliation tick.
//!
//! The coordinator owns every scheduler and the job registry. One call to
//! [`Coordinator::tick`] runs a full pass over them:
//! - Register inventory nodes and drop nodes that disappeared
//! - Apply withdrawals and time-allocation changes
//! - Fold replica observations into job states and prune stale replicas
//! - Terminate jobs that stopped reporting
//! - Queue new submissions and place as many queued jobs as fit
//! - Compute queue availability per product
//!
//! The tick performs no I/O apart from handing update batches to the sink.
//! Starting and terminating replicas is left to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use compute_events::{
    Dimensions, InventorySnapshot, JobSpec, JobState, JobUpdate, ProductQueueStatus, QueueStatus,
    QueueStatusSnapshot, ReplicaObservation,
};
use compute_reconcile::chunked;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::executor::TerminateRequest;
use crate::handoff::HandoffBuffer;
use crate::registry::{JobRecord, JobRegistry};
use crate::scheduler::{SchedulerDump, SchedulerSet};
use crate::sink::JobSink;
use crate::tracker::{BatchSettings, JobTracker, JobUpdateBatch};

/// Status shown to a newly submitted job that could not be placed.
pub const NO_MACHINES_MESSAGE: &str = "There are currently no machines available to run your job.\n\
A smaller machine might give you quicker access to your job.";

/// Status shown to a job whose dispatch failed.
pub const DISPATCH_FAILED_MESSAGE: &str = "Failed to schedule job";

/// A machine shape offered to clients, used for queue availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub resource_class: String,
    pub dimensions: Dimensions,
}

/// Coordinator settings.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub batch: BatchSettings,

    /// CPU added to observed node usage for system daemons.
    pub system_reserved_cpu_millis: i64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            batch: BatchSettings::default(),
            system_reserved_cpu_millis: 500,
        }
    }
}

/// Everything a tick reads.
pub struct TickInput<'a> {
    pub now: DateTime<Utc>,
    pub inventory: &'a InventorySnapshot,
    pub observations: Vec<ReplicaObservation>,
    pub handoff: HandoffBuffer,
}

/// A replica to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub job: JobSpec,
    pub rank: u32,
    pub node: String,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub submitted: usize,
    pub placed: usize,
    pub pruned_replicas: usize,
    pub pruned_nodes: usize,
    pub terminated: usize,
}

impl TickStats {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything a tick produces for the caller to act on.
#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub dispatches: Vec<Dispatch>,
    pub terminations: Vec<TerminateRequest>,
    pub queue_status: QueueStatusSnapshot,
    pub dumps: Vec<SchedulerDump>,
    pub stats: TickStats,
}

/// Owner of all scheduling state.
pub struct Coordinator {
    schedulers: SchedulerSet,
    registry: JobRegistry,
    products: Vec<Product>,
    settings: CoordinatorSettings,
    sink: Arc<dyn JobSink>,
}

impl Coordinator {
    pub fn new(
        schedulers: SchedulerSet,
        products: Vec<Product>,
        settings: CoordinatorSettings,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            schedulers,
            registry: JobRegistry::new(),
            products,
            settings,
            sink,
        }
    }

    pub fn schedulers(&self) -> &SchedulerSet {
        &self.schedulers
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Restore jobs known from before a restart.
    ///
    /// Queued jobs go back into their scheduler's queue. Jobs in other
    /// active states are only recorded; their replicas are re-registered
    /// once the executors report them.
    pub fn recover(&mut self, jobs: Vec<JobRecord>) -> usize {
        let mut recovered = 0;

        for record in jobs {
            if record.state.is_final() {
                continue;
            }

            if record.state == JobState::InQueue {
                let spec = &record.spec;
                let queued = self
                    .schedulers
                    .get_or_create(&spec.resource_class)
                    .and_then(|scheduler| {
                        scheduler.register_job_in_queue(
                            &spec.job_id,
                            spec.dimensions,
                            spec.replicas,
                            spec.submitted_at,
                            spec.job_length(),
                        )
                    });
                if let Err(e) = queued {
                    warn!(job_id = %spec.job_id, error = %e, "Could not re-queue recovered job");
                    continue;
                }
            }

            if self.registry.insert(record) {
                recovered += 1;
            }
        }

        info!(recovered, "Recovered jobs");
        recovered
    }

    /// Run one reconciliation pass.
    #[instrument(skip_all, fields(now = %input.now))]
    pub fn tick(&mut self, input: TickInput<'_>) -> TickOutput {
        let TickInput {
            now,
            inventory,
            observations,
            mut handoff,
        } = input;

        let mut output = TickOutput::default();
        let mut messages = Vec::new();

        output.stats.pruned_nodes = self.sync_nodes(inventory);

        // Submissions withdrawn before they were ever queued are dropped.
        let withdrawn: BTreeSet<&String> = handoff.withdrawals.iter().collect();
        handoff.submissions.retain(|spec| !withdrawn.contains(&spec.job_id));

        for job_id in &handoff.withdrawals {
            if let Some(request) = self.withdraw(job_id) {
                output.terminations.push(request);
            }
        }
        for (job_id, secs) in &handoff.time_allocations {
            self.update_time_allocation(job_id, *secs);
        }

        let mut tracker = JobTracker::new();
        let mut batch = JobUpdateBatch::begin(
            &mut self.registry,
            self.sink.as_ref(),
            self.settings.batch,
            now,
        );

        for observation in observations {
            tracker.track_state(observation, &mut self.schedulers, &mut batch);
        }

        for (job_id, rank) in &handoff.started_dispatches {
            let confirmed = self
                .schedulers
                .iter_mut()
                .any(|scheduler| scheduler.confirm_dispatch(job_id, *rank));
            if !confirmed {
                debug!(job_id = %job_id, rank, "Started replica is no longer placed");
            }
        }

        for job_id in &handoff.failed_dispatches {
            for scheduler in self.schedulers.iter_mut() {
                scheduler.release_job(job_id);
                scheduler.remove_job_from_queue(job_id);
            }
            batch.track_state(job_id, JobState::Failure, Some(DISPATCH_FAILED_MESSAGE.to_string()));
        }

        for scheduler in self.schedulers.iter_mut() {
            output.stats.pruned_replicas += scheduler.prune_replicas().len();
            for entry in scheduler.queue() {
                batch.track_state(&entry.job_id, JobState::InQueue, None);
            }
            // Replicas still bound after pruning are pending or just started.
            for replica in scheduler.replicas() {
                batch.keep_alive(&replica.job_id);
            }
        }

        let results = batch.end();
        for job in results.terminated_due_to_unknown_state {
            output.terminations.push(TerminateRequest {
                job,
                is_cleanup: true,
            });
        }

        if let Some(usage) = &inventory.usage {
            self.sync_usage(usage);
        }

        let submitted = self.register_submissions(handoff.submissions);
        output.stats.submitted = submitted.len();

        let mut placed_jobs = BTreeSet::new();
        for scheduler in self.schedulers.iter_mut() {
            for placed in scheduler.schedule(now) {
                let Some(record) = self.registry.get(&placed.job_id) else {
                    warn!(job_id = %placed.job_id, "Placed job has no record");
                    continue;
                };
                let job = record.spec.clone();

                if job.replicas == 1 {
                    messages.push(JobUpdate::message(
                        &job.job_id,
                        format!(
                            "Job has been scheduled and is starting soon (Assigned to {})",
                            placed.node
                        ),
                    ));
                } else if placed.rank == 0 {
                    messages.push(JobUpdate::message(
                        &job.job_id,
                        format!(
                            "Job has been scheduled and is starting soon (Rank 0 assigned to {})",
                            placed.node
                        ),
                    ));
                }

                placed_jobs.insert(job.job_id.clone());
                output.dispatches.push(Dispatch {
                    job,
                    rank: placed.rank,
                    node: placed.node,
                });
            }
        }
        output.stats.placed = output.dispatches.len();

        for job_id in submitted {
            if !placed_jobs.contains(&job_id) {
                messages.push(JobUpdate::message(job_id, NO_MACHINES_MESSAGE));
            }
        }

        output.queue_status = self.queue_status(now);

        if handoff.dump_requested {
            output.dumps = self.schedulers.iter().map(|s| s.dump()).collect();
        }

        self.publish_messages(messages);
        output.stats.terminated = output.terminations.len();
        output
    }

    /// Register every inventory node with the schedulers of its classes and
    /// drop nodes that are gone. Returns the number of pruned nodes.
    fn sync_nodes(&mut self, inventory: &InventorySnapshot) -> usize {
        for node in &inventory.nodes {
            let capacity = node.effective_capacity();
            let limits = node.effective_limits();

            for class in &node.resource_classes {
                match self.schedulers.get_or_create(class) {
                    Ok(scheduler) => {
                        scheduler.register_node(&node.name, capacity, limits, node.unschedulable)
                    }
                    Err(_) => {
                        debug!(node = %node.name, resource_class = %class, "Skipping unserved class")
                    }
                }
            }
        }

        self.schedulers
            .iter_mut()
            .map(|scheduler| scheduler.prune_nodes().len())
            .sum()
    }

    /// Fold observed node usage into the schedulers.
    ///
    /// Observed usage (plus the system reserve) can only tighten what the
    /// ledger already binds: a snapshot older than a placement must not hand
    /// that placement's resources out again.
    fn sync_usage(&mut self, usage: &BTreeMap<String, Dimensions>) {
        let reserved = Dimensions::new(self.settings.system_reserved_cpu_millis, 0, 0);

        for scheduler in self.schedulers.iter_mut() {
            for name in scheduler.node_names() {
                let (Some(observed), Some(node)) = (usage.get(&name), scheduler.node(&name)) else {
                    continue;
                };
                let used = node
                    .usage()
                    .component_max(*observed + reserved)
                    .component_min(node.capacity);
                scheduler.synchronize_node_usage(&name, used);
            }
        }
    }

    /// Forget a job. Returns a cleanup request if it had placed replicas.
    fn withdraw(&mut self, job_id: &str) -> Option<TerminateRequest> {
        let record = self.registry.remove(job_id);

        let mut released = false;
        for scheduler in self.schedulers.iter_mut() {
            scheduler.remove_job_from_queue(job_id);
            released |= !scheduler.release_job(job_id).is_empty();
        }

        let Some(record) = record else {
            info!(job_id = %job_id, "Withdrawal for unknown job");
            return None;
        };

        info!(job_id = %job_id, released, "Job withdrawn");
        released.then_some(TerminateRequest {
            job: record.spec,
            is_cleanup: true,
        })
    }

    fn update_time_allocation(&mut self, job_id: &str, secs: u64) {
        let recorded = self.registry.update_time_allocation(job_id, secs);
        let scheduled = self
            .schedulers
            .find_job_mut(job_id)
            .is_some_and(|scheduler| {
                scheduler.update_time_allocation(job_id, Duration::from_secs(secs))
            });

        if !recorded && !scheduled {
            warn!(job_id = %job_id, "Time allocation update for unknown job");
        }
    }

    /// Queue new jobs. Returns the ids of the jobs that were accepted.
    fn register_submissions(&mut self, submissions: Vec<JobSpec>) -> Vec<String> {
        let mut accepted = Vec::with_capacity(submissions.len());

        for spec in submissions {
            if let Err(e) = spec.validate() {
                warn!(job_id = %spec.job_id, error = %e, "Rejecting invalid submission");
                continue;
            }
            if self.registry.contains(&spec.job_id) {
                warn!(job_id = %spec.job_id, "Ignoring duplicate submission");
                continue;
            }

            let queued = self
                .schedulers
                .get_or_create(&spec.resource_class)
                .and_then(|scheduler| {
                    scheduler.register_job_in_queue(
                        &spec.job_id,
                        spec.dimensions,
                        spec.replicas,
                        spec.submitted_at,
                        spec.job_length(),
                    )
                });
            if let Err(e) = queued {
                warn!(job_id = %spec.job_id, error = %e, "Could not queue submission");
                continue;
            }

            debug!(job_id = %spec.job_id, resource_class = %spec.resource_class, "Job queued");
            accepted.push(spec.job_id.clone());
            self.registry.insert(JobRecord::queued(spec));
        }

        accepted
    }

    fn queue_status(&self, now: DateTime<Utc>) -> QueueStatusSnapshot {
        let products = self
            .products
            .iter()
            .map(|product| ProductQueueStatus {
                product: product.name.clone(),
                resource_class: product.resource_class.clone(),
                status: self
                    .schedulers
                    .get(&product.resource_class)
                    .map_or(QueueStatus::Full, |s| s.queue_status(product.dimensions)),
            })
            .collect();

        QueueStatusSnapshot {
            computed_at: Some(now),
            products,
        }
    }

    fn publish_messages(&self, messages: Vec<JobUpdate>) {
        if messages.is_empty() {
            return;
        }

        for chunk in chunked(messages, self.settings.batch.batch_size) {
            if let Err(e) = self.sink.publish(chunk) {
                warn!(error = %e, "Failed to publish status messages");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerPolicy;
    use crate::sink::RecordingSink;
    use compute_events::{Backend, NodeInventory};

    fn coordinator(sink: Arc<RecordingSink>) -> Coordinator {
        Coordinator::new(
            SchedulerSet::new(SchedulerPolicy::default()),
            vec![Product {
                name: "standard-1".to_string(),
                resource_class: "standard".to_string(),
                dimensions: Dimensions::new(1000, 0, 0),
            }],
            CoordinatorSettings::default(),
            sink,
        )
    }

    fn inventory(cpu: i64) -> InventorySnapshot {
        let cap = Dimensions::new(cpu, 0, 0);
        InventorySnapshot {
            nodes: vec![NodeInventory {
                name: "n1".to_string(),
                capacity: cap,
                limits: cap,
                unschedulable: false,
                conditions: Vec::new(),
                resource_classes: vec!["standard".to_string()],
            }],
            usage: None,
        }
    }

    fn spec(job_id: &str, cpu: i64, now: DateTime<Utc>) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            resource_class: "standard".to_string(),
            backend: Backend::Container,
            dimensions: Dimensions::new(cpu, 0, 0),
            replicas: 1,
            submitted_at: now,
            time_allocation_secs: None,
        }
    }

    fn submit(jobs: Vec<JobSpec>) -> HandoffBuffer {
        HandoffBuffer {
            submissions: jobs,
            ..HandoffBuffer::default()
        }
    }

    #[test]
    fn test_submission_is_placed_and_announced() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink.clone());
        let now = Utc::now();
        let inventory = inventory(4000);

        let output = coordinator.tick(TickInput {
            now,
            inventory: &inventory,
            observations: Vec::new(),
            handoff: submit(vec![spec("job-1", 1000, now)]),
        });

        assert_eq!(output.dispatches.len(), 1);
        assert_eq!(output.dispatches[0].node, "n1");
        assert_eq!(output.stats.submitted, 1);
        assert_eq!(output.stats.placed, 1);

        let updates = sink.updates_for("job-1");
        assert_eq!(
            updates[0].status.as_deref(),
            Some("Job has been scheduled and is starting soon (Assigned to n1)")
        );
        assert_eq!(output.queue_status.products[0].status, QueueStatus::Available);
    }

    #[test]
    fn test_unplaced_submission_gets_no_machines_message() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink.clone());
        let now = Utc::now();
        let inventory = inventory(500);

        let output = coordinator.tick(TickInput {
            now,
            inventory: &inventory,
            observations: Vec::new(),
            handoff: submit(vec![spec("job-1", 1000, now)]),
        });

        assert!(output.dispatches.is_empty());
        assert_eq!(sink.updates_for("job-1")[0].status.as_deref(), Some(NO_MACHINES_MESSAGE));
        assert_eq!(output.queue_status.products[0].status, QueueStatus::Full);
        assert!(coordinator.schedulers().get("standard").unwrap().is_queued("job-1"));
    }

    #[test]
    fn test_dispatch_failure_fails_job() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink.clone());
        let now = Utc::now();
        let inventory = inventory(4000);

        coordinator.tick(TickInput {
            now,
            inventory: &inventory,
            observations: Vec::new(),
            handoff: submit(vec![spec("job-1", 1000, now)]),
        });

        let output = coordinator.tick(TickInput {
            now,
            inventory: &inventory,
            observations: Vec::new(),
            handoff: HandoffBuffer {
                failed_dispatches: vec!["job-1".to_string()],
                ..HandoffBuffer::default()
            },
        });

        assert!(output.dispatches.is_empty());
        assert!(!coordinator.registry().contains("job-1"));
        let last = sink.updates_for("job-1").pop().unwrap();
        assert_eq!(last.state, Some(JobState::Failure));
    }

    #[test]
    fn test_node_usage_includes_system_reserve() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink);
        let mut inventory = inventory(4000);
        inventory.usage = Some([("n1".to_string(), Dimensions::new(1000, 0, 0))].into());

        coordinator.tick(TickInput {
            now: Utc::now(),
            inventory: &inventory,
            observations: Vec::new(),
            handoff: HandoffBuffer::default(),
        });

        let node = coordinator.schedulers().get("standard").unwrap().node("n1").unwrap();
        assert_eq!(node.remaining, Dimensions::new(2500, 0, 0));
    }

    #[test]
    fn test_dump_on_request() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink);
        let inventory = inventory(4000);

        let output = coordinator.tick(TickInput {
            now: Utc::now(),
            inventory: &inventory,
            observations: Vec::new(),
            handoff: HandoffBuffer {
                dump_requested: true,
                ..HandoffBuffer::default()
            },
        });

        assert_eq!(output.dumps.len(), 1);
        assert_eq!(output.dumps[0].name, "standard");
        assert!(output.stats.is_idle());
    }

    #[test]
    fn test_withdrawn_submission_is_never_queued() {
        let sink = Arc::new(RecordingSink::new());
        let mut coordinator = coordinator(sink.clone());
        let now = Utc::now();
        let inventory = inventory(4000);

        let output = coordinator.tick(TickInput {
            now,
            inventory: &inventory,
            observations: Vec::new(),
            handoff: HandoffBuffer {
                submissions: vec![spec("job-1", 1000, now)],
                withdrawals: vec!["job-1".to_string()],
                ..HandoffBuffer::default()
            },
        });

        assert!(output.dispatches.is_empty());
        assert!(!coordinator.registry().contains("job-1"));
        assert!(sink.updates().is_empty());
    }
}
