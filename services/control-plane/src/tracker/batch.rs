//! Write-behind buffer of job updates for one tick.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use compute_events::{JobSpec, JobState, JobUpdate};
use compute_reconcile::{BatchSize, DEFAULT_INQUEUE_GRACE};
use tracing::{debug, warn};

use crate::registry::JobRegistry;
use crate::sink::JobSink;

/// Flush and termination settings.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub batch_size: BatchSize,

    /// How long a queued job may go untracked before it is terminated.
    pub inqueue_grace: ChronoDuration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            inqueue_grace: ChronoDuration::from_std(DEFAULT_INQUEUE_GRACE)
                .unwrap_or_else(|_| ChronoDuration::minutes(5)),
        }
    }
}

/// Jobs whose state changed during the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResults {
    pub normal_start: Vec<String>,
    pub normal_termination: Vec<String>,
    pub normal_suspension: Vec<String>,

    /// Jobs that stopped reporting and were given a synthesized final state.
    pub terminated_due_to_unknown_state: Vec<JobSpec>,
}

/// Buffers updates for the job-management API and applies them to the
/// registry once accepted by the sink.
///
/// After a failed flush the batch stops sending and [`JobUpdateBatch::end`]
/// reports nothing, so the next tick starts again from the unchanged
/// registry.
pub struct JobUpdateBatch<'a> {
    registry: &'a mut JobRegistry,
    sink: &'a dyn JobSink,
    settings: BatchSettings,
    now: DateTime<Utc>,
    entries: Vec<JobUpdate>,
    touched: BTreeSet<String>,
    emitted_states: BTreeMap<String, JobState>,
    emitted_nodes: BTreeMap<String, Vec<String>>,
    failed: bool,
    results: BatchResults,
}

impl<'a> JobUpdateBatch<'a> {
    pub fn begin(
        registry: &'a mut JobRegistry,
        sink: &'a dyn JobSink,
        settings: BatchSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            registry,
            sink,
            settings,
            now,
            entries: Vec::new(),
            touched: BTreeSet::new(),
            emitted_states: BTreeMap::new(),
            emitted_nodes: BTreeMap::new(),
            failed: false,
            results: BatchResults::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        self.registry
    }

    pub fn is_touched(&self, job_id: &str) -> bool {
        self.touched.contains(job_id)
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Buffer an update, flushing when the batch is full.
    pub fn add_update(&mut self, update: JobUpdate) {
        if let Some(state) = update.state {
            let id = update.job_id.clone();
            match state {
                JobState::Running => self.results.normal_start.push(id),
                JobState::Suspended => self.results.normal_suspension.push(id),
                JobState::Success | JobState::Expired | JobState::Failure => {
                    self.results.normal_termination.push(id)
                }
                JobState::InQueue => {}
            }
        }

        self.entries.push(update);
        if self.entries.len() >= self.settings.batch_size.get() {
            self.flush();
        }
    }

    /// Mark a job as accounted for without changing its state.
    pub fn keep_alive(&mut self, job_id: &str) {
        self.touched.insert(job_id.to_string());
    }

    /// Mark a job as observed in `state`.
    ///
    /// An update is buffered only when the job is known and `state` differs
    /// from the last recorded or already-buffered state. Returns true if an
    /// update was buffered.
    pub fn track_state(&mut self, job_id: &str, state: JobState, status: Option<String>) -> bool {
        self.touched.insert(job_id.to_string());

        let current = match self.emitted_states.get(job_id) {
            Some(emitted) => *emitted,
            None => match self.registry.get(job_id) {
                Some(record) => record.state,
                None => return false,
            },
        };
        if current == state {
            return false;
        }

        let status = status.unwrap_or_else(|| state.default_message().to_string());
        self.emitted_states.insert(job_id.to_string(), state);
        self.add_update(JobUpdate::state_change(job_id, state, status));
        true
    }

    /// Record the nodes a job's replicas run on, indexed by rank.
    pub fn track_assigned_nodes(&mut self, job_id: &str, nodes: Vec<String>) {
        let current = match self.emitted_nodes.get(job_id) {
            Some(emitted) => emitted.as_slice(),
            None => match self.registry.get(job_id) {
                Some(record) => record.assigned_nodes.as_slice(),
                None => return,
            },
        };
        if current == nodes.as_slice() {
            return;
        }

        self.emitted_nodes.insert(job_id.to_string(), nodes.clone());
        self.add_update(JobUpdate {
            job_id: job_id.to_string(),
            state: None,
            status: None,
            assigned_nodes: Some(nodes),
        });
    }

    fn flush(&mut self) {
        if self.failed || self.entries.is_empty() {
            return;
        }

        let entries = std::mem::take(&mut self.entries);
        if let Err(e) = self.sink.publish(entries.clone()) {
            warn!(error = %e, count = entries.len(), "Failed to flush job updates");
            self.failed = true;
            return;
        }

        debug!(count = entries.len(), "Flushed job updates");
        for update in &entries {
            self.registry.apply(update, self.now);
        }
    }

    /// Terminate silent jobs and flush everything that is left.
    ///
    /// Every active job that was not tracked during this batch gets
    /// `Success`, or `Expired` when its deadline has passed. Queued jobs
    /// younger than the grace period are left alone.
    pub fn end(mut self) -> BatchResults {
        if self.failed {
            return BatchResults::default();
        }

        let now = self.now;
        let grace = self.settings.inqueue_grace;
        let silent: Vec<(JobSpec, JobState, bool)> = self
            .registry
            .iter()
            .filter(|record| !record.state.is_final())
            .filter(|record| {
                !(record.state == JobState::InQueue && now - record.spec.submitted_at < grace)
            })
            .filter(|record| !self.touched.contains(record.job_id()))
            .map(|record| (record.spec.clone(), record.state, record.is_expired(now)))
            .collect();

        for (spec, current, expired) in silent {
            let state = if expired {
                JobState::Expired
            } else {
                JobState::Success
            };

            if current != state {
                self.add_update(JobUpdate::state_change(
                    spec.job_id.clone(),
                    state,
                    state.default_message(),
                ));
            }

            debug!(job_id = %spec.job_id, state = %state, "Terminating job with unknown state");
            self.results.terminated_due_to_unknown_state.push(spec);
        }

        self.flush();
        std::mem::take(&mut self.results)
    }
}
