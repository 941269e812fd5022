//! Scheduler module for job placement.
//!
//! The scheduler is responsible for:
//! - Tracking nodes, their capacity and their fault-adjusted limits
//! - Holding the queue of jobs awaiting placement and scoring their priority
//! - Keeping the ledger of placed replicas and returning their resources when
//!   they stop being observed
//! - Bin-packing queued jobs onto nodes once per tick
//!
//! A [`Scheduler`] is owned by exactly one coordinator and is never shared
//! across threads. Within a tick, pruning must run before [`Scheduler::schedule`]
//! so stale entries never influence a placement decision.

mod node;
mod placement;
mod priority;
mod queue;
mod replica;
mod set;

use std::collections::BTreeMap;
use std::time::Duration;

use compute_events::{Dimensions, QueueStatus};
use compute_reconcile::Tick;
use serde::Serialize;
use thiserror::Error;

pub use node::SchedulerNode;
pub use priority::{ConstantFairShare, FairShare, PriorityFactors};
pub use queue::QueueEntry;
pub use replica::ReplicaEntry;
pub use set::SchedulerSet;

/// Scheduler errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// No scheduler serves the requested resource class.
    #[error("unknown resource class: {0}")]
    UnknownResourceClass(String),

    /// The job is already queued or placed.
    #[error("job {0} is already known to the scheduler")]
    DuplicateJob(String),
}

/// Placement policy for one scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerPolicy {
    /// Let later jobs place when an earlier one cannot.
    pub backfill: bool,

    /// Prefer large jobs instead of small ones in the job-size factor.
    pub favor_large_jobs: bool,

    /// Pack replicas onto the most-full node instead of spreading them.
    pub job_compaction: bool,

    pub weight_age: f64,
    pub weight_job_size: f64,
    pub weight_fair_share: f64,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            backfill: true,
            favor_large_jobs: false,
            job_compaction: true,
            weight_age: 1.0,
            weight_job_size: 1.0,
            weight_fair_share: 1.0,
        }
    }
}

/// A replica placed by [`Scheduler::schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedReplica {
    pub job_id: String,
    pub rank: u32,
    pub node: String,
    pub dimensions: Dimensions,
    pub job_length: Duration,
}

/// Point-in-time copy of a scheduler's state.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerDump {
    pub name: String,
    pub tick: u64,
    pub nodes: Vec<SchedulerNode>,
    pub queue: Vec<QueueEntry>,
    pub replicas: Vec<ReplicaEntry>,
}

/// Cluster scheduler for one resource class.
pub struct Scheduler {
    name: String,
    policy: SchedulerPolicy,
    fair_share: Box<dyn FairShare>,
    nodes: BTreeMap<String, SchedulerNode>,
    queue: Vec<QueueEntry>,
    replicas: BTreeMap<(String, u32), ReplicaEntry>,
    tick: Tick,
}

impl Scheduler {
    /// Create a scheduler with the constant fair-share factor.
    pub fn new(name: impl Into<String>, policy: SchedulerPolicy) -> Self {
        Self::with_fair_share(name, policy, Box::new(ConstantFairShare))
    }

    pub fn with_fair_share(
        name: impl Into<String>,
        policy: SchedulerPolicy,
        fair_share: Box<dyn FairShare>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            fair_share,
            nodes: BTreeMap::new(),
            queue: Vec::new(),
            replicas: BTreeMap::new(),
            tick: Tick::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    /// Current liveness tick.
    pub fn tick(&self) -> u64 {
        self.tick.current()
    }

    /// Coarse availability for a request shape, computed by dry-running a
    /// single- and a double-replica placement.
    pub fn queue_status(&self, dimensions: Dimensions) -> QueueStatus {
        let single = self.can_place(dimensions, 1);
        let double = self.can_place(dimensions, 2);
        QueueStatus::from_dry_runs(single, double)
    }

    pub fn dump(&self) -> SchedulerDump {
        SchedulerDump {
            name: self.name.clone(),
            tick: self.tick.current(),
            nodes: self.nodes.values().cloned().collect(),
            queue: self.queue.clone(),
            replicas: self.replicas.values().cloned().collect(),
        }
    }

    /// Returns true if the job is queued or has placed replicas.
    pub fn knows_job(&self, job_id: &str) -> bool {
        self.is_queued(job_id) || self.has_replicas(job_id)
    }
}
