//! Replica ledger.

use std::time::Duration;

use compute_events::Dimensions;
use serde::Serialize;
use tracing::{debug, warn};

use super::Scheduler;

/// A replica bound to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaEntry {
    pub job_id: String,
    pub rank: u32,
    pub dimensions: Dimensions,
    pub node: String,
    pub last_seen: u64,
    pub job_length: Duration,

    /// Placed but not yet confirmed started or observed. Pending replicas
    /// keep their resources bound through pruning.
    pub pending: bool,
}

impl Scheduler {
    /// Record a replica observed running on `node`.
    ///
    /// Idempotent: a known `(job_id, rank)` only has its liveness refreshed
    /// and stops being pending. Unknown nodes are ignored with a warning.
    /// Returns true if the replica is tracked after the call.
    pub fn register_running_replica(
        &mut self,
        job_id: &str,
        rank: u32,
        dimensions: Dimensions,
        node: &str,
        job_length: Duration,
    ) -> bool {
        let tick = self.tick.current();
        let key = (job_id.to_string(), rank);

        if let Some(replica) = self.replicas.get_mut(&key) {
            replica.last_seen = tick;
            replica.pending = false;
            return true;
        }

        if !self.nodes.contains_key(node) {
            warn!(
                scheduler = %self.name,
                job_id = %job_id,
                rank,
                node = %node,
                "Running replica reported on a node unknown to the scheduler"
            );
            return false;
        }

        // A job observed running is no longer waiting.
        if self.remove_job_from_queue(job_id).is_some() {
            debug!(scheduler = %self.name, job_id = %job_id, "Dequeued job observed running");
        }

        self.replicas.insert(
            key,
            ReplicaEntry {
                job_id: job_id.to_string(),
                rank,
                dimensions,
                node: node.to_string(),
                last_seen: tick,
                job_length,
                pending: false,
            },
        );
        true
    }

    /// Mark a placed replica as started by its executor.
    ///
    /// The replica counts as seen in the current tick, so it survives until
    /// the next monitoring round can report it. Returns false if the replica
    /// is no longer in the ledger.
    pub fn confirm_dispatch(&mut self, job_id: &str, rank: u32) -> bool {
        let tick = self.tick.current();
        match self.replicas.get_mut(&(job_id.to_string(), rank)) {
            Some(replica) => {
                replica.pending = false;
                replica.last_seen = tick;
                true
            }
            None => false,
        }
    }

    /// Stop holding a placed replica that its backend reported finished.
    ///
    /// The replica is dropped at the next [`Scheduler::prune_replicas`]
    /// unless it is observed running again.
    pub fn settle_dispatch(&mut self, job_id: &str, rank: u32) {
        if let Some(replica) = self.replicas.get_mut(&(job_id.to_string(), rank)) {
            replica.pending = false;
        }
    }

    /// Recompute node usage from live replicas and drop stale replicas.
    ///
    /// Every node's remaining resources are rebuilt as capacity minus the
    /// replicas seen this tick and the replicas still pending dispatch, which
    /// also heals drift from earlier usage synchronization. Returns the
    /// replicas that were dropped.
    pub fn prune_replicas(&mut self) -> Vec<ReplicaEntry> {
        let tick = self.tick;

        for node in self.nodes.values_mut() {
            node.remaining = node.capacity;
        }

        let mut pruned = Vec::new();
        let replicas = std::mem::take(&mut self.replicas);
        for (key, replica) in replicas {
            if !replica.pending && !tick.is_current(replica.last_seen) {
                pruned.push(replica);
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&replica.node) {
                node.remaining -= replica.dimensions;
            }
            self.replicas.insert(key, replica);
        }

        if !pruned.is_empty() {
            debug!(scheduler = %self.name, count = pruned.len(), "Pruned replicas");
        }
        pruned
    }

    /// Placed replicas of one job in rank order.
    pub fn job_replicas(&self, job_id: &str) -> Vec<&ReplicaEntry> {
        self.replicas
            .range((job_id.to_string(), 0)..=(job_id.to_string(), u32::MAX))
            .map(|(_, replica)| replica)
            .collect()
    }

    pub(super) fn job_replicas_mut(&mut self, job_id: &str) -> impl Iterator<Item = &mut ReplicaEntry> {
        self.replicas
            .range_mut((job_id.to_string(), 0)..=(job_id.to_string(), u32::MAX))
            .map(|(_, replica)| replica)
    }

    pub fn has_replicas(&self, job_id: &str) -> bool {
        !self.job_replicas(job_id).is_empty()
    }

    /// All placed replicas ordered by `(job_id, rank)`.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaEntry> {
        self.replicas.values()
    }

    /// Forget every replica of a job without waiting for it to go unobserved.
    ///
    /// Resources return to the nodes at the next [`Scheduler::prune_replicas`].
    pub fn release_job(&mut self, job_id: &str) -> Vec<ReplicaEntry> {
        let keys: Vec<(String, u32)> = self
            .job_replicas(job_id)
            .into_iter()
            .map(|r| (r.job_id.clone(), r.rank))
            .collect();

        keys.into_iter()
            .filter_map(|key| self.replicas.remove(&key))
            .collect()
    }

    pub(super) fn insert_placed_replica(&mut self, replica: ReplicaEntry) {
        self.replicas
            .insert((replica.job_id.clone(), replica.rank), replica);
    }
}
