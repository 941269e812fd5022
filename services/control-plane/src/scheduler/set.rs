//! One scheduler per resource class.

use std::collections::{BTreeMap, BTreeSet};

use super::{Scheduler, SchedulerError, SchedulerPolicy};

/// Schedulers keyed by resource class.
///
/// When constructed with a fixed set of classes, only those classes are
/// served. Otherwise a scheduler is created the first time a class is seen.
pub struct SchedulerSet {
    policy: SchedulerPolicy,
    allowed: Option<BTreeSet<String>>,
    schedulers: BTreeMap<String, Scheduler>,
}

impl SchedulerSet {
    /// A set that creates schedulers on demand.
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            allowed: None,
            schedulers: BTreeMap::new(),
        }
    }

    /// A set restricted to `classes`.
    pub fn with_classes<I, S>(policy: SchedulerPolicy, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: BTreeSet<String> = classes.into_iter().map(Into::into).collect();
        let schedulers = allowed
            .iter()
            .map(|class| (class.clone(), Scheduler::new(class.clone(), policy.clone())))
            .collect();

        Self {
            policy,
            allowed: Some(allowed),
            schedulers,
        }
    }

    pub fn is_allowed(&self, class: &str) -> bool {
        self.allowed.as_ref().is_none_or(|allowed| allowed.contains(class))
    }

    /// The scheduler for `class`, creating it if the class is allowed.
    pub fn get_or_create(&mut self, class: &str) -> Result<&mut Scheduler, SchedulerError> {
        if !self.is_allowed(class) {
            return Err(SchedulerError::UnknownResourceClass(class.to_string()));
        }

        let policy = &self.policy;
        Ok(self
            .schedulers
            .entry(class.to_string())
            .or_insert_with(|| Scheduler::new(class, policy.clone())))
    }

    pub fn get(&self, class: &str) -> Option<&Scheduler> {
        self.schedulers.get(class)
    }

    pub fn get_mut(&mut self, class: &str) -> Option<&mut Scheduler> {
        self.schedulers.get_mut(class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scheduler> {
        self.schedulers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Scheduler> {
        self.schedulers.values_mut()
    }

    /// The scheduler that currently queues or places `job_id`.
    pub fn find_job_mut(&mut self, job_id: &str) -> Option<&mut Scheduler> {
        self.schedulers.values_mut().find(|s| s.knows_job(job_id))
    }
}
