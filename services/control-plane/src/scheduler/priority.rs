//! Priority scoring.

use chrono::{DateTime, Utc};
use compute_reconcile::Span;
use serde::Serialize;

use super::{QueueEntry, SchedulerPolicy};

/// The three contributions to a queue entry's priority, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriorityFactors {
    pub age: f64,
    pub job_size: f64,
    pub fair_share: f64,
}

/// Source of the fair-share factor.
pub trait FairShare: Send + Sync {
    /// Factor in `[0, 1]` for a queued job.
    fn factor(&self, entry: &QueueEntry) -> f64;
}

/// Treats every job equally.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantFairShare;

impl FairShare for ConstantFairShare {
    fn factor(&self, _entry: &QueueEntry) -> f64 {
        1.0
    }
}

fn seconds_waited(entry: &QueueEntry, now: DateTime<Utc>) -> f64 {
    (now - entry.submitted_at).num_milliseconds() as f64 / 1000.0
}

fn cpu_requested(entry: &QueueEntry) -> f64 {
    entry.dimensions.cpu_millis as f64 * f64::from(entry.replicas)
}

/// Score every entry and sort the queue by descending priority, ties by
/// ascending job id.
///
/// Queues with fewer than two entries are left untouched.
pub(super) fn prioritize(
    queue: &mut [QueueEntry],
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
    fair_share: &dyn FairShare,
) {
    if queue.len() <= 1 {
        return;
    }

    let ages = Span::of(queue.iter().map(|e| seconds_waited(e, now)));
    let sizes = Span::of(queue.iter().map(cpu_requested));
    let (Some(ages), Some(sizes)) = (ages, sizes) else {
        return;
    };

    for entry in queue.iter_mut() {
        let age = ages.normalize(seconds_waited(entry, now));

        let mut job_size = sizes.normalize(cpu_requested(entry));
        if sizes.max != sizes.min && !policy.favor_large_jobs {
            job_size = 1.0 - job_size;
        }

        let factors = PriorityFactors {
            age,
            job_size,
            fair_share: fair_share.factor(entry),
        };

        entry.priority = policy.weight_age * factors.age
            + policy.weight_job_size * factors.job_size
            + policy.weight_fair_share * factors.fair_share;
        entry.factors = factors;
    }

    queue.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });
}
