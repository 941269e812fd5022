//! Active job records.
//!
//! The registry holds the last state confirmed to the job-management API for
//! every job that has not reached a final state. Records change only when an
//! update batch flushes successfully.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use compute_events::{JobSpec, JobState, JobUpdate};
use serde::{Deserialize, Serialize};

/// One active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_nodes: Vec<String>,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn queued(spec: JobSpec) -> Self {
        Self {
            spec,
            state: JobState::InQueue,
            started_at: None,
            expires_at: None,
            assigned_nodes: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.spec.job_id
    }

    /// Deadline derived from a start time and the job's time allocation.
    fn deadline(&self, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let length = ChronoDuration::from_std(self.spec.job_length()).ok()?;
        started_at.checked_add_signed(length)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

/// Records keyed by job id.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobRecord>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns false if the job was already known.
    pub fn insert(&mut self, record: JobRecord) -> bool {
        if self.jobs.contains_key(record.job_id()) {
            return false;
        }
        self.jobs.insert(record.job_id().to_string(), record);
        true
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    pub fn remove(&mut self, job_id: &str) -> Option<JobRecord> {
        self.jobs.remove(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    /// Change a job's time allocation and move its deadline accordingly.
    pub fn update_time_allocation(&mut self, job_id: &str, secs: u64) -> bool {
        let Some(record) = self.jobs.get_mut(job_id) else {
            return false;
        };

        record.spec.time_allocation_secs = Some(secs);
        if let Some(started_at) = record.started_at {
            record.expires_at = record.deadline(started_at);
        }
        true
    }

    /// Apply an update acknowledged by the job-management API.
    ///
    /// Running stamps the start time and deadline; final states drop the
    /// record.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        let Some(record) = self.jobs.get_mut(&update.job_id) else {
            return;
        };

        if let Some(nodes) = &update.assigned_nodes {
            record.assigned_nodes = nodes.clone();
        }

        let Some(state) = update.state else {
            return;
        };

        record.state = state;
        if state == JobState::Running {
            record.started_at = Some(now);
            record.expires_at = record.deadline(now);
        }

        if state.is_final() {
            self.jobs.remove(&update.job_id);
        }
    }
}
