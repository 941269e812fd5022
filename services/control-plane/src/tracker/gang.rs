//! Per-job replica aggregation.

use std::collections::BTreeMap;

use compute_events::{JobState, ReplicaObservation};

/// Latest observation per rank for one job during one tick.
#[derive(Debug, Clone, Default)]
pub struct JobGang {
    ranks: BTreeMap<u32, ReplicaObservation>,
}

/// What a complete gang reports for its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GangSummary {
    pub state: JobState,
    pub status: Option<String>,

    /// Node per rank, present only when every rank reported one.
    pub nodes: Option<Vec<String>>,
}

impl JobGang {
    /// Record an observation, replacing any earlier one for the same rank.
    pub fn record(&mut self, observation: ReplicaObservation) {
        self.ranks.insert(observation.rank, observation);
    }

    /// Number of distinct ranks observed.
    pub fn reported(&self) -> usize {
        self.ranks.len()
    }

    /// Fold the gang into one job state.
    ///
    /// Returns `None` until every rank in `0..replicas` has reported. The
    /// highest-precedence replica state wins; among equals the lowest rank
    /// supplies the status message.
    pub fn summarize(&self, replicas: u32) -> Option<GangSummary> {
        let mut best: Option<&ReplicaObservation> = None;
        let mut nodes = Some(Vec::with_capacity(replicas as usize));

        for rank in 0..replicas {
            let observation = self.ranks.get(&rank)?;

            if best.is_none_or(|b| observation.state.precedence() > b.state.precedence()) {
                best = Some(observation);
            }

            nodes = match (nodes, &observation.node) {
                (Some(mut list), Some(node)) => {
                    list.push(node.clone());
                    Some(list)
                }
                _ => None,
            };
        }

        let best = best?;
        Some(GangSummary {
            state: best.state,
            status: best.status.clone(),
            nodes,
        })
    }
}
