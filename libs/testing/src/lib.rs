//! Fixture builders for control plane tests.
//!
//! ```ignore
//! let snapshot = snapshot([node("n1").cpu(10_000).build()]);
//! let job = job("job-1").cpu(1000).replicas(2).build();
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use compute_events::{
    Backend, ConditionStatus, Dimensions, InventorySnapshot, JobSpec, JobState, NodeCondition,
    NodeConditionKind, NodeInventory, ReplicaObservation,
};

/// Resource class used by fixtures unless overridden.
pub const DEFAULT_CLASS: &str = "standard";

/// Fixed reference instant so test output does not depend on the wall clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `epoch()` plus `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(secs)
}

pub fn dims(cpu_millis: i64, memory_bytes: i64, gpu: i64) -> Dimensions {
    Dimensions::new(cpu_millis, memory_bytes, gpu)
}

// =============================================================================
// Nodes
// =============================================================================

pub fn node(name: &str) -> NodeBuilder {
    NodeBuilder {
        node: NodeInventory {
            name: name.to_string(),
            capacity: Dimensions::ZERO,
            limits: Dimensions::ZERO,
            unschedulable: false,
            conditions: Vec::new(),
            resource_classes: vec![DEFAULT_CLASS.to_string()],
        },
        limits_set: false,
    }
}

pub struct NodeBuilder {
    node: NodeInventory,
    limits_set: bool,
}

impl NodeBuilder {
    pub fn capacity(mut self, capacity: Dimensions) -> Self {
        self.node.capacity = capacity;
        self
    }

    pub fn cpu(mut self, cpu_millis: i64) -> Self {
        self.node.capacity.cpu_millis = cpu_millis;
        self
    }

    pub fn memory(mut self, memory_bytes: i64) -> Self {
        self.node.capacity.memory_bytes = memory_bytes;
        self
    }

    pub fn gpu(mut self, gpu: i64) -> Self {
        self.node.capacity.gpu = gpu;
        self
    }

    /// Explicit limits. Without this call limits equal capacity.
    pub fn limits(mut self, limits: Dimensions) -> Self {
        self.node.limits = limits;
        self.limits_set = true;
        self
    }

    pub fn unschedulable(mut self) -> Self {
        self.node.unschedulable = true;
        self
    }

    pub fn condition(mut self, kind: NodeConditionKind, status: ConditionStatus) -> Self {
        self.node.conditions.push(NodeCondition { kind, status });
        self
    }

    pub fn classes(mut self, classes: &[&str]) -> Self {
        self.node.resource_classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn build(mut self) -> NodeInventory {
        if !self.limits_set {
            self.node.limits = self.node.capacity;
        }
        self.node
    }
}

pub fn snapshot(nodes: impl IntoIterator<Item = NodeInventory>) -> InventorySnapshot {
    InventorySnapshot {
        nodes: nodes.into_iter().collect(),
        usage: None,
    }
}

// =============================================================================
// Jobs
// =============================================================================

pub fn job(job_id: &str) -> JobBuilder {
    JobBuilder {
        spec: JobSpec {
            job_id: job_id.to_string(),
            resource_class: DEFAULT_CLASS.to_string(),
            backend: Backend::Container,
            dimensions: Dimensions::ZERO,
            replicas: 1,
            submitted_at: epoch(),
            time_allocation_secs: None,
        },
    }
}

pub struct JobBuilder {
    spec: JobSpec,
}

impl JobBuilder {
    pub fn dimensions(mut self, dimensions: Dimensions) -> Self {
        self.spec.dimensions = dimensions;
        self
    }

    pub fn cpu(mut self, cpu_millis: i64) -> Self {
        self.spec.dimensions.cpu_millis = cpu_millis;
        self
    }

    pub fn memory(mut self, memory_bytes: i64) -> Self {
        self.spec.dimensions.memory_bytes = memory_bytes;
        self
    }

    pub fn gpu(mut self, gpu: i64) -> Self {
        self.spec.dimensions.gpu = gpu;
        self
    }

    pub fn replicas(mut self, replicas: u32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.spec.resource_class = class.to_string();
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.spec.backend = backend;
        self
    }

    pub fn submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.spec.submitted_at = submitted_at;
        self
    }

    pub fn time_allocation_secs(mut self, secs: u64) -> Self {
        self.spec.time_allocation_secs = Some(secs);
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

// =============================================================================
// Observations
// =============================================================================

pub fn observed(job_id: &str, rank: u32, state: JobState) -> ReplicaObservation {
    ReplicaObservation {
        job_id: job_id.to_string(),
        rank,
        state,
        node: None,
        status: None,
    }
}

pub fn running_on(job_id: &str, rank: u32, node: &str) -> ReplicaObservation {
    ReplicaObservation {
        node: Some(node.to_string()),
        ..observed(job_id, rank, JobState::Running)
    }
}
