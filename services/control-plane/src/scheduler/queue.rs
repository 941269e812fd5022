//! Queue of jobs awaiting placement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use compute_events::Dimensions;
use serde::Serialize;

use super::{PriorityFactors, Scheduler, SchedulerError};

/// A job waiting for placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub job_id: String,

    /// Request per replica.
    pub dimensions: Dimensions,

    pub replicas: u32,
    pub submitted_at: DateTime<Utc>,
    pub job_length: Duration,

    /// Score from the latest scoring pass. Higher places first.
    pub priority: f64,
    pub factors: PriorityFactors,
}

impl Scheduler {
    /// Add a job to the queue.
    ///
    /// Fails if the job is already queued or already has placed replicas.
    pub fn register_job_in_queue(
        &mut self,
        job_id: &str,
        dimensions: Dimensions,
        replicas: u32,
        submitted_at: DateTime<Utc>,
        job_length: Duration,
    ) -> Result<(), SchedulerError> {
        if self.knows_job(job_id) {
            return Err(SchedulerError::DuplicateJob(job_id.to_string()));
        }

        self.queue.push(QueueEntry {
            job_id: job_id.to_string(),
            dimensions,
            replicas,
            submitted_at,
            job_length,
            priority: 0.0,
            factors: PriorityFactors::default(),
        });
        Ok(())
    }

    /// Withdraw a job from the queue.
    pub fn remove_job_from_queue(&mut self, job_id: &str) -> Option<QueueEntry> {
        let index = self.queue.iter().position(|e| e.job_id == job_id)?;
        Some(self.queue.remove(index))
    }

    pub fn is_queued(&self, job_id: &str) -> bool {
        self.queue.iter().any(|e| e.job_id == job_id)
    }

    pub fn queue_entry(&self, job_id: &str) -> Option<&QueueEntry> {
        self.queue.iter().find(|e| e.job_id == job_id)
    }

    /// Queued entries in their current order.
    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    /// Change a job's estimated run length, whether queued or placed.
    ///
    /// Returns false if the job is unknown.
    pub fn update_time_allocation(&mut self, job_id: &str, job_length: Duration) -> bool {
        if let Some(entry) = self.queue.iter_mut().find(|e| e.job_id == job_id) {
            entry.job_length = job_length;
            return true;
        }

        let mut found = false;
        for replica in self.job_replicas_mut(job_id) {
            replica.job_length = job_length;
            found = true;
        }
        found
    }
}
