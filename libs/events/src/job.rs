//! Job submissions, replica observations and job updates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Dimensions, EventError};

/// Time allocation assumed for jobs that do not declare one.
pub const DEFAULT_TIME_ALLOCATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// =============================================================================
// Job State
// =============================================================================

/// Externally visible state of a job (and of a single replica).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    InQueue,
    Running,
    Suspended,
    Success,
    Expired,
    Failure,
}

impl JobState {
    /// Returns true if the job can never leave this state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success | Self::Expired | Self::Failure)
    }

    /// Precedence used when folding replica states into one job state.
    ///
    /// Higher wins: Running > InQueue > Suspended > Success > Expired > Failure.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Running => 5,
            Self::InQueue => 4,
            Self::Suspended => 3,
            Self::Success => 2,
            Self::Expired => 1,
            Self::Failure => 0,
        }
    }

    /// Status message attached to a state change when the backend gave none.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::InQueue => "Your job is currently in the queue.",
            Self::Running => "Your job is now running.",
            Self::Suspended => "Your machine is currently powered off.",
            Self::Success => "Your job has successfully completed.",
            Self::Expired => "Your job has expired.",
            Self::Failure => "Your job has failed.",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InQueue => "in_queue",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Success => "success",
            Self::Expired => "expired",
            Self::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// Execution backend a job declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Container,
    VirtualMachine,
}

// =============================================================================
// Submission
// =============================================================================

/// A job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job identifier assigned by the job-management API.
    pub job_id: String,

    /// Resource class (machine category) whose nodes may run the job.
    pub resource_class: String,

    /// Backend responsible for starting replicas.
    #[serde(default)]
    pub backend: Backend,

    /// Resources requested by each replica.
    pub dimensions: Dimensions,

    /// Number of replicas in the gang.
    pub replicas: u32,

    /// Submission time.
    pub submitted_at: DateTime<Utc>,

    /// Requested time allocation in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_allocation_secs: Option<u64>,
}

impl JobSpec {
    /// Estimated run length, falling back to [`DEFAULT_TIME_ALLOCATION`].
    pub fn job_length(&self) -> Duration {
        self.time_allocation_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIME_ALLOCATION)
    }

    /// Check the submission for values the scheduler cannot place.
    pub fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason: &str| EventError::InvalidJob {
            job_id: self.job_id.clone(),
            reason: reason.to_string(),
        };

        if self.job_id.trim().is_empty() {
            return Err(invalid("job_id must not be empty"));
        }
        if self.resource_class.trim().is_empty() {
            return Err(invalid("resource_class must not be empty"));
        }
        if self.replicas == 0 {
            return Err(invalid("replicas must be at least 1"));
        }
        if !self.dimensions.is_non_negative() {
            return Err(invalid("dimensions must not be negative"));
        }
        Ok(())
    }
}

// =============================================================================
// Observations and Updates
// =============================================================================

/// One replica's state as reported by an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaObservation {
    pub job_id: String,
    pub rank: u32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// An update sent to the job-management API.
///
/// An update without a state only carries a status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_nodes: Option<Vec<String>>,
}

impl JobUpdate {
    /// A state transition with a message.
    pub fn state_change(job_id: impl Into<String>, state: JobState, status: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: Some(state),
            status: Some(status.into()),
            assigned_nodes: None,
        }
    }

    /// A status message that leaves the state untouched.
    pub fn message(job_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: None,
            status: Some(status.into()),
            assigned_nodes: None,
        }
    }
}
