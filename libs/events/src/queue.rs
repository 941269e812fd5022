//! Coarse queue availability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether more work of a given shape fits right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// At least two more replicas fit.
    Available,
    /// Exactly one more replica fits.
    Busy,
    /// Nothing fits.
    Full,
}

impl QueueStatus {
    /// Derive the status from single- and double-replica dry runs.
    pub fn from_dry_runs(single: bool, double: bool) -> Self {
        match (single, double) {
            (true, true) => Self::Available,
            (true, false) => Self::Busy,
            _ => Self::Full,
        }
    }
}

/// Availability of one product (a named request shape within a resource class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQueueStatus {
    pub product: String,
    pub resource_class: String,
    pub status: QueueStatus,
}

/// All product availabilities computed by one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusSnapshot {
    pub computed_at: Option<DateTime<Utc>>,
    pub products: Vec<ProductQueueStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dry_runs() {
        assert_eq!(QueueStatus::from_dry_runs(true, true), QueueStatus::Available);
        assert_eq!(QueueStatus::from_dry_runs(true, false), QueueStatus::Busy);
        assert_eq!(QueueStatus::from_dry_runs(false, false), QueueStatus::Full);
    }
}
