//! Reconciliation loop primitives.
//!
//! Helpers shared by loops that repeatedly compare observed state with
//! recorded state and converge the two. Key concepts:
//!
//! - **Tick**: a monotonically increasing counter. Anything stamped with an
//!   older tick than the current one was not observed this round.
//! - **Span**: min/max bounds of a set of samples, used to normalize a
//!   sample into `[0, 1]`.
//! - **Batch size**: upper bound on how many updates leave in one request.
//!
//! # Invariants
//!
//! - All operations are deterministic given the same inputs
//! - The tick never goes backwards

use std::time::Duration;

use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Timeout waiting for an observation source.
    #[error("timeout after {elapsed:?} waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
    },

    /// A batch size of zero cannot make progress.
    #[error("invalid batch size: {0}")]
    InvalidBatchSize(usize),
}

// =============================================================================
// Tick
// =============================================================================

/// Liveness counter for one reconciliation loop.
///
/// Entries record the tick at which they were last observed; entries whose
/// stamp differs from [`Tick::current`] were not seen this round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u64);

impl Tick {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn current(&self) -> u64 {
        self.0
    }

    /// Move to the next round.
    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Returns true if `stamp` was taken during the current round.
    pub fn is_current(&self, stamp: u64) -> bool {
        stamp == self.0
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Min/max bounds of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub min: f64,
    pub max: f64,
}

impl Span {
    /// Bounds of `samples`, or `None` when there are none.
    pub fn of<I>(samples: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        samples.into_iter().fold(None, |span, sample| {
            Some(match span {
                None => Span {
                    min: sample,
                    max: sample,
                },
                Some(Span { min, max }) => Span {
                    min: min.min(sample),
                    max: max.max(sample),
                },
            })
        })
    }

    /// Linear interpolation of `sample` into `[0, 1]`.
    ///
    /// A degenerate span (all samples equal) maps everything to `1.0`.
    pub fn normalize(&self, sample: f64) -> f64 {
        let width = self.max - self.min;
        if width == 0.0 {
            return 1.0;
        }
        (sample - self.min) / width
    }
}

// =============================================================================
// Batching
// =============================================================================

/// Maximum number of items sent in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(usize);

impl BatchSize {
    pub fn new(size: usize) -> Result<Self, ReconcileError> {
        if size == 0 {
            return Err(ReconcileError::InvalidBatchSize(size));
        }
        Ok(Self(size))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(DEFAULT_BATCH_SIZE)
    }
}

/// Split `items` into groups of at most `size`, preserving order.
pub fn chunked<T>(items: Vec<T>, size: BatchSize) -> Vec<Vec<T>> {
    let mut groups = Vec::with_capacity(items.len().div_ceil(size.get()));
    let mut current = Vec::with_capacity(size.get().min(items.len()));

    for item in items {
        current.push(item);
        if current.len() == size.get() {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

/// Default job monitoring interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default node inventory refresh interval.
pub const DEFAULT_INVENTORY_INTERVAL: Duration = Duration::from_secs(15);

/// Default number of updates per flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default grace period before a queued job with no observation is terminated.
pub const DEFAULT_INQUEUE_GRACE: Duration = Duration::from_secs(5 * 60);
