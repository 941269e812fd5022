//! Node inventory snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Dimensions, EventError};

/// Node condition reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeConditionKind {
    Ready,
    MemoryPressure,
    DiskPressure,
    PidPressure,
    NetworkUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: NodeConditionKind,
    pub status: ConditionStatus,
}

impl NodeCondition {
    /// Returns true if this condition means the node cannot take new work.
    pub fn blocks_admission(&self) -> bool {
        match self.kind {
            NodeConditionKind::Ready => self.status != ConditionStatus::True,
            NodeConditionKind::MemoryPressure
            | NodeConditionKind::DiskPressure
            | NodeConditionKind::PidPressure
            | NodeConditionKind::NetworkUnavailable => self.status == ConditionStatus::True,
        }
    }
}

/// One node as seen by the cluster inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInventory {
    pub name: String,

    /// Steady-state size of the node.
    pub capacity: Dimensions,

    /// What the node can currently tolerate (allocatable).
    pub limits: Dimensions,

    #[serde(default)]
    pub unschedulable: bool,

    #[serde(default)]
    pub conditions: Vec<NodeCondition>,

    /// Resource classes this node serves.
    #[serde(default)]
    pub resource_classes: Vec<String>,
}

impl NodeInventory {
    /// Capacity with negative components removed.
    pub fn effective_capacity(&self) -> Dimensions {
        self.capacity.clamp_non_negative()
    }

    /// Limits after applying node conditions.
    ///
    /// Any blocking condition zeroes the limits: the node stays in the
    /// bookkeeping but admits nothing new.
    pub fn effective_limits(&self) -> Dimensions {
        if self.conditions.iter().any(NodeCondition::blocks_admission) {
            return Dimensions::ZERO;
        }
        self.limits.clamp_non_negative()
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.name.trim().is_empty() {
            return Err(EventError::InvalidNode {
                name: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// A point-in-time view of every node in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub nodes: Vec<NodeInventory>,

    /// Authoritative usage per node, when the source can observe it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<BTreeMap<String, Dimensions>>,
}

impl InventorySnapshot {
    /// Parse a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let snapshot: InventorySnapshot = serde_json::from_str(json)?;
        for node in &snapshot.nodes {
            node.validate()?;
        }
        Ok(snapshot)
    }
}
