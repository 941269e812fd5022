//! Job and gang state tracking.
//!
//! Replica observations from the execution backends are folded into one
//! state per job. A job's state changes only once every rank has reported
//! during the tick; jobs that stop reporting entirely are terminated by
//! [`JobUpdateBatch::end`].

mod batch;
mod gang;

use std::collections::BTreeMap;

use compute_events::{JobState, ReplicaObservation};
use tracing::{info, warn};

use crate::scheduler::SchedulerSet;

pub use batch::{BatchResults, BatchSettings, JobUpdateBatch};
pub use gang::{GangSummary, JobGang};

/// Per-tick aggregation of replica observations.
#[derive(Debug, Default)]
pub struct JobTracker {
    gangs: BTreeMap<String, JobGang>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one replica observation.
    ///
    /// A running replica with a node is registered in its scheduler's ledger;
    /// a replica that already finished stops holding its placement.
    /// Once the gang is complete its overall state (and, if every rank has a
    /// node, the node list) is forwarded to the batch. Returns false if the
    /// job is unknown.
    pub fn track_state(
        &mut self,
        observation: ReplicaObservation,
        schedulers: &mut SchedulerSet,
        batch: &mut JobUpdateBatch<'_>,
    ) -> bool {
        let Some(record) = batch.registry().get(&observation.job_id) else {
            info!(job_id = %observation.job_id, rank = observation.rank, "Observation for unknown job");
            return false;
        };
        let spec = record.spec.clone();

        let Some(scheduler) = schedulers.get_mut(&spec.resource_class) else {
            warn!(
                job_id = %spec.job_id,
                resource_class = %spec.resource_class,
                "No scheduler for observed job"
            );
            return false;
        };

        if observation.state == JobState::Running {
            if let Some(node) = &observation.node {
                scheduler.register_running_replica(
                    &spec.job_id,
                    observation.rank,
                    spec.dimensions,
                    node,
                    spec.job_length(),
                );
            }
        } else if observation.state.is_final() {
            scheduler.settle_dispatch(&spec.job_id, observation.rank);
        }

        let gang = self.gangs.entry(spec.job_id.clone()).or_default();
        gang.record(observation);

        // An incomplete gang keeps its previous state. If it never completes
        // the job goes untouched and the batch terminates it.
        let Some(summary) = gang.summarize(spec.replicas) else {
            return true;
        };

        if let Some(nodes) = summary.nodes {
            batch.track_assigned_nodes(&spec.job_id, nodes);
        }
        batch.track_state(&spec.job_id, summary.state, summary.status);
        true
    }

    pub fn gang(&self, job_id: &str) -> Option<&JobGang> {
        self.gangs.get(job_id)
    }
}
