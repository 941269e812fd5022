//! Execution backends.
//!
//! The scheduler never talks to a backend directly. It emits placements and
//! the worker hands them to the [`Executor`] chosen by [`Executors::for_backend`]
//! from the job's declared backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use compute_events::{Backend, JobSpec, JobState, ReplicaObservation};
use tracing::{debug, info};

/// Request to stop every replica of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateRequest {
    pub job: JobSpec,

    /// True when the job already reached a final state and only its
    /// resources need cleaning up.
    pub is_cleanup: bool,
}

/// A backend that realizes placements.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Start one replica of `job` on `node`.
    async fn start_scheduled_replica(&self, job: &JobSpec, rank: u32, node: &str) -> Result<()>;

    /// Stop every replica of a job.
    async fn terminate(&self, request: &TerminateRequest) -> Result<()>;

    /// Current state of every replica this backend runs.
    async fn monitor(&self) -> Result<Vec<ReplicaObservation>>;
}

/// The executor for each backend kind.
#[derive(Clone)]
pub struct Executors {
    container: Arc<dyn Executor>,
    virtual_machine: Arc<dyn Executor>,
}

impl Executors {
    pub fn new(container: Arc<dyn Executor>, virtual_machine: Arc<dyn Executor>) -> Self {
        Self {
            container,
            virtual_machine,
        }
    }

    /// One executor serving both backends.
    pub fn single(executor: Arc<dyn Executor>) -> Self {
        Self::new(executor.clone(), executor)
    }

    pub fn for_backend(&self, backend: Backend) -> &Arc<dyn Executor> {
        match backend {
            Backend::Container => &self.container,
            Backend::VirtualMachine => &self.virtual_machine,
        }
    }

    /// Observations from every distinct backend.
    pub async fn monitor(&self) -> Result<Vec<ReplicaObservation>> {
        let mut observations = self.container.monitor().await?;
        if !Arc::ptr_eq(&self.container, &self.virtual_machine) {
            observations.extend(self.virtual_machine.monitor().await?);
        }
        Ok(observations)
    }
}

// =============================================================================
// In-memory executor
// =============================================================================

/// Executor that keeps replicas in memory and reports them running on their
/// assigned node until terminated.
#[derive(Debug, Default)]
pub struct InMemoryExecutor {
    replicas: Mutex<BTreeMap<(String, u32), String>>,
    fail_starts: AtomicBool,
    terminations: Mutex<Vec<TerminateRequest>>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose starts always fail.
    pub fn failing() -> Self {
        let executor = Self::default();
        executor.set_fail_starts(true);
        executor
    }

    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Stop reporting a replica, as if its process vanished.
    pub fn lose_replica(&self, job_id: &str, rank: u32) {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(job_id.to_string(), rank));
    }

    /// Running replicas as `((job_id, rank), node)`.
    pub fn running(&self) -> Vec<((String, u32), String)> {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn terminations(&self) -> Vec<TerminateRequest> {
        self.terminations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Executor for InMemoryExecutor {
    async fn start_scheduled_replica(&self, job: &JobSpec, rank: u32, node: &str) -> Result<()> {
        if self.fail_starts.load(Ordering::SeqCst) {
            anyhow::bail!("executor configured to fail starts");
        }

        info!(job_id = %job.job_id, rank, node = %node, "Starting replica");
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job.job_id.clone(), rank), node.to_string());
        Ok(())
    }

    async fn terminate(&self, request: &TerminateRequest) -> Result<()> {
        debug!(job_id = %request.job.job_id, is_cleanup = request.is_cleanup, "Terminating job");
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(job_id, _), _| *job_id != request.job.job_id);
        self.terminations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(())
    }

    async fn monitor(&self) -> Result<Vec<ReplicaObservation>> {
        let replicas = self.replicas.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(replicas
            .iter()
            .map(|((job_id, rank), node)| ReplicaObservation {
                job_id: job_id.clone(),
                rank: *rank,
                state: JobState::Running,
                node: Some(node.clone()),
                status: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use compute_events::Dimensions;

    fn job(job_id: &str, backend: Backend) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            resource_class: "standard".to_string(),
            backend,
            dimensions: Dimensions::new(100, 0, 0),
            replicas: 2,
            submitted_at: Utc::now(),
            time_allocation_secs: None,
        }
    }

    #[tokio::test]
    async fn test_started_replicas_are_observed_running() {
        let executor = InMemoryExecutor::new();
        let spec = job("job-1", Backend::Container);
        executor.start_scheduled_replica(&spec, 0, "n1").await.unwrap();
        executor.start_scheduled_replica(&spec, 1, "n2").await.unwrap();

        let observed = executor.monitor().await.unwrap();
        assert_eq!(observed.len(), 2);
        assert!(observed.iter().all(|o| o.state == JobState::Running));
        assert_eq!(observed[1].node.as_deref(), Some("n2"));

        executor
            .terminate(&TerminateRequest { job: spec, is_cleanup: true })
            .await
            .unwrap();
        assert!(executor.monitor().await.unwrap().is_empty());
        assert_eq!(executor.terminations().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_executor() {
        let executor = InMemoryExecutor::failing();
        let spec = job("job-1", Backend::Container);
        assert!(executor.start_scheduled_replica(&spec, 0, "n1").await.is_err());
        assert!(executor.running().is_empty());
    }

    #[tokio::test]
    async fn test_backend_selects_executor() {
        let containers = Arc::new(InMemoryExecutor::new());
        let vms = Arc::new(InMemoryExecutor::new());
        let executors = Executors::new(containers.clone(), vms.clone());

        let vm_job = job("vm", Backend::VirtualMachine);
        executors
            .for_backend(vm_job.backend)
            .start_scheduled_replica(&vm_job, 0, "n1")
            .await
            .unwrap();

        assert!(containers.running().is_empty());
        assert_eq!(vms.running().len(), 1);
        assert_eq!(executors.monitor().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_executor_is_monitored_once() {
        let executor = Arc::new(InMemoryExecutor::new());
        let executors = Executors::single(executor.clone());
        let spec = job("job-1", Backend::Container);
        executor.start_scheduled_replica(&spec, 0, "n1").await.unwrap();

        assert_eq!(executors.monitor().await.unwrap().len(), 1);
    }
}
