//! Hand-off buffer between request handlers and the reconciliation tick.
//!
//! Handlers append to the buffer under a short lock; the tick swaps the whole
//! buffer out at its start. The lock is never held while scheduling.

use std::sync::{Arc, Mutex, PoisonError};

use compute_events::JobSpec;

/// Requests accumulated since the last tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffBuffer {
    pub submissions: Vec<JobSpec>,
    pub withdrawals: Vec<String>,

    /// `(job_id, time_allocation_secs)` pairs.
    pub time_allocations: Vec<(String, u64)>,

    /// `(job_id, rank)` replicas their executor has started.
    pub started_dispatches: Vec<(String, u32)>,

    /// Jobs whose replica could not be started by their executor.
    pub failed_dispatches: Vec<String>,

    pub dump_requested: bool,
}

impl HandoffBuffer {
    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
            && self.withdrawals.is_empty()
            && self.time_allocations.is_empty()
            && self.started_dispatches.is_empty()
            && self.failed_dispatches.is_empty()
            && !self.dump_requested
    }
}

/// Shared handle to the hand-off buffer.
#[derive(Debug, Clone, Default)]
pub struct HandoffQueue {
    inner: Arc<Mutex<HandoffBuffer>>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_buffer<T>(&self, f: impl FnOnce(&mut HandoffBuffer) -> T) -> T {
        let mut buffer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut buffer)
    }

    pub fn submit(&self, job: JobSpec) {
        self.with_buffer(|b| b.submissions.push(job));
    }

    pub fn withdraw(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        self.with_buffer(|b| b.withdrawals.push(job_id));
    }

    pub fn update_time_allocation(&self, job_id: impl Into<String>, secs: u64) {
        let job_id = job_id.into();
        self.with_buffer(|b| b.time_allocations.push((job_id, secs)));
    }

    pub fn report_dispatch_started(&self, job_id: impl Into<String>, rank: u32) {
        let job_id = job_id.into();
        self.with_buffer(|b| b.started_dispatches.push((job_id, rank)));
    }

    pub fn report_dispatch_failure(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        self.with_buffer(|b| b.failed_dispatches.push(job_id));
    }

    pub fn request_dump(&self) {
        self.with_buffer(|b| b.dump_requested = true);
    }

    /// Take everything accumulated so far, leaving an empty buffer.
    pub fn swap(&self) -> HandoffBuffer {
        self.with_buffer(std::mem::take)
    }
}
