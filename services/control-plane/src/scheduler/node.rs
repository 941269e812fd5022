//! Node tracker.

use compute_events::Dimensions;
use serde::Serialize;
use tracing::{debug, warn};

use super::Scheduler;

/// Scheduler bookkeeping for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerNode {
    pub name: String,

    /// Steady-state size. Never changed by fault reports.
    pub capacity: Dimensions,

    /// Fault-sensitive admission ceiling.
    pub limits: Dimensions,

    /// Capacity minus everything bound to the node.
    pub remaining: Dimensions,

    pub last_seen: u64,
    pub unschedulable: bool,
}

impl SchedulerNode {
    /// Usage implied by the node's bookkeeping.
    pub fn usage(&self) -> Dimensions {
        self.capacity - self.remaining
    }
}

impl Scheduler {
    /// Register or refresh a node.
    ///
    /// A known node only has its limits, schedulability and liveness marker
    /// refreshed; capacity and remaining stay untouched.
    pub fn register_node(
        &mut self,
        name: &str,
        capacity: Dimensions,
        limits: Dimensions,
        unschedulable: bool,
    ) {
        let tick = self.tick.current();

        if let Some(node) = self.nodes.get_mut(name) {
            node.limits = limits;
            node.unschedulable = unschedulable;
            node.last_seen = tick;
            return;
        }

        debug!(scheduler = %self.name, node = %name, %capacity, "Registering new node");
        self.nodes.insert(
            name.to_string(),
            SchedulerNode {
                name: name.to_string(),
                capacity,
                limits,
                remaining: capacity,
                last_seen: tick,
                unschedulable,
            },
        );
    }

    /// Remove nodes that were not registered during the current tick.
    pub fn prune_nodes(&mut self) -> Vec<String> {
        let tick = self.tick;
        let mut pruned = Vec::new();

        self.nodes.retain(|name, node| {
            let live = tick.is_current(node.last_seen);
            if !live {
                pruned.push(name.clone());
            }
            live
        });

        if !pruned.is_empty() {
            debug!(scheduler = %self.name, count = pruned.len(), "Pruned nodes");
        }
        pruned
    }

    /// Overwrite a node's remaining resources from authoritative usage.
    pub fn synchronize_node_usage(&mut self, name: &str, usage: Dimensions) {
        match self.nodes.get_mut(name) {
            Some(node) => node.remaining = node.capacity - usage,
            None => warn!(scheduler = %self.name, node = %name, "Usage reported for unknown node"),
        }
    }

    pub fn node(&self, name: &str) -> Option<&SchedulerNode> {
        self.nodes.get(name)
    }

    /// Nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &SchedulerNode> {
        self.nodes.values()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}
