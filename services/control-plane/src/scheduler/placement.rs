//! Bin-packing placement.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use compute_events::Dimensions;
use tracing::debug;

use super::{priority, PlacedReplica, ReplicaEntry, Scheduler, SchedulerNode};

/// Node order for a placement scan.
///
/// Compaction visits the most-full node first, spread the least-full.
/// Remaining GPU is compared first, then CPU, then memory; ties go to name.
fn node_order(a: &SchedulerNode, b: &SchedulerNode, compaction: bool) -> Ordering {
    let key = |n: &SchedulerNode| (n.remaining.gpu, n.remaining.cpu_millis, n.remaining.memory_bytes);

    let by_remaining = key(a).cmp(&key(b));
    let by_remaining = if compaction {
        by_remaining
    } else {
        by_remaining.reverse()
    };
    by_remaining.then_with(|| a.name.cmp(&b.name))
}

/// Take `request` from the node if it fits both remaining and limits.
fn admit(node: &mut SchedulerNode, request: Dimensions) -> bool {
    if node.unschedulable || !node.remaining.satisfies(&request) {
        return false;
    }

    node.remaining -= request;
    if !node.limits.satisfies(&node.usage()) {
        node.remaining += request;
        return false;
    }
    true
}

/// Place every replica of a request or none of them.
///
/// On success the returned names are indexed by rank and the nodes'
/// remaining resources have been reduced. On failure nothing changes.
fn try_place(
    nodes: &mut BTreeMap<String, SchedulerNode>,
    request: Dimensions,
    replicas: u32,
    compaction: bool,
) -> Option<Vec<String>> {
    let wanted = replicas as usize;
    let mut allocated: Vec<String> = Vec::with_capacity(wanted);

    {
        let mut pool: Vec<&mut SchedulerNode> = nodes.values_mut().collect();
        if !compaction {
            pool.sort_by(|a, b| node_order(a, b, false));
        }

        while allocated.len() < wanted {
            if compaction {
                pool.sort_by(|a, b| node_order(a, b, true));
            }

            let chosen = pool
                .iter_mut()
                .find_map(|node| admit(node, request).then(|| node.name.clone()));

            match chosen {
                Some(name) => allocated.push(name),
                None => break,
            }
        }
    }

    if allocated.len() < wanted {
        for name in &allocated {
            if let Some(node) = nodes.get_mut(name) {
                node.remaining += request;
            }
        }
        return None;
    }

    Some(allocated)
}

impl Scheduler {
    /// Score the queue, place what fits and advance the tick.
    ///
    /// Jobs that cannot be placed stay queued; a failed attempt is not an
    /// error. Without backfill the pass stops at the first job that does not
    /// fit.
    pub fn schedule(&mut self, now: DateTime<Utc>) -> Vec<PlacedReplica> {
        priority::prioritize(&mut self.queue, now, &self.policy, self.fair_share.as_ref());

        let tick = self.tick.current();
        let compaction = self.policy.job_compaction;
        let mut placed = Vec::new();
        let mut blocked = false;

        let queue = std::mem::take(&mut self.queue);
        let mut waiting = Vec::with_capacity(queue.len());

        for entry in queue {
            if blocked {
                waiting.push(entry);
                continue;
            }

            let Some(assigned) = try_place(&mut self.nodes, entry.dimensions, entry.replicas, compaction)
            else {
                blocked = !self.policy.backfill;
                waiting.push(entry);
                continue;
            };

            for (rank, node) in (0u32..).zip(assigned) {
                placed.push(PlacedReplica {
                    job_id: entry.job_id.clone(),
                    rank,
                    node: node.clone(),
                    dimensions: entry.dimensions,
                    job_length: entry.job_length,
                });
                self.insert_placed_replica(ReplicaEntry {
                    job_id: entry.job_id.clone(),
                    rank,
                    dimensions: entry.dimensions,
                    node,
                    last_seen: tick,
                    job_length: entry.job_length,
                    pending: true,
                });
            }
        }

        self.queue = waiting;
        self.tick.advance();

        if !placed.is_empty() {
            debug!(
                scheduler = %self.name,
                placed = placed.len(),
                queued = self.queue.len(),
                "Placement pass complete"
            );
        }
        placed
    }

    /// Dry-run placement against a copy of the nodes.
    pub fn can_place(&self, request: Dimensions, replicas: u32) -> bool {
        let mut nodes = self.nodes.clone();
        try_place(&mut nodes, request, replicas, self.policy.job_compaction).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerPolicy;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn node(name: &str, capacity: Dimensions) -> SchedulerNode {
        SchedulerNode {
            name: name.to_string(),
            capacity,
            limits: capacity,
            remaining: capacity,
            last_seen: 0,
            unschedulable: false,
        }
    }

    fn pool(nodes: Vec<SchedulerNode>) -> BTreeMap<String, SchedulerNode> {
        nodes.into_iter().map(|n| (n.name.clone(), n)).collect()
    }

    #[test]
    fn test_compaction_prefers_fullest_node() {
        let mut nodes = pool(vec![
            node("a", Dimensions::new(4000, 0, 0)),
            node("b", Dimensions::new(2000, 0, 0)),
        ]);

        let placed = try_place(&mut nodes, Dimensions::new(1000, 0, 0), 2, true).unwrap();
        assert_eq!(placed, vec!["b", "b"]);
    }

    #[test]
    fn test_spread_prefers_emptiest_node() {
        let mut nodes = pool(vec![
            node("a", Dimensions::new(4000, 0, 0)),
            node("b", Dimensions::new(2000, 0, 0)),
        ]);

        let placed = try_place(&mut nodes, Dimensions::new(1000, 0, 0), 2, false).unwrap();
        assert_eq!(placed, vec!["a", "a"]);
        assert_eq!(nodes["a"].remaining, Dimensions::new(2000, 0, 0));
    }

    #[test]
    fn test_gpu_dominates_node_order() {
        let mut nodes = pool(vec![
            node("cpu-heavy", Dimensions::new(64000, 0, 0)),
            node("gpu", Dimensions::new(1000, 0, 4)),
        ]);

        let placed = try_place(&mut nodes, Dimensions::new(500, 0, 0), 1, true).unwrap();
        assert_eq!(placed, vec!["cpu-heavy"]);
    }

    #[test]
    fn test_unschedulable_nodes_are_skipped() {
        let mut cordoned = node("a", Dimensions::new(4000, 0, 0));
        cordoned.unschedulable = true;
        let mut nodes = pool(vec![cordoned, node("b", Dimensions::new(4000, 0, 0))]);

        let placed = try_place(&mut nodes, Dimensions::new(1000, 0, 0), 1, true).unwrap();
        assert_eq!(placed, vec!["b"]);
    }

    #[test]
    fn test_limits_reject_degraded_node() {
        let mut degraded = node("a", Dimensions::new(4000, 0, 8));
        degraded.limits = Dimensions::new(4000, 0, 6);
        degraded.remaining = Dimensions::new(3000, 0, 2);
        let mut nodes = pool(vec![degraded]);

        assert!(try_place(&mut nodes, Dimensions::new(100, 0, 2), 1, true).is_none());
        assert_eq!(nodes["a"].remaining, Dimensions::new(3000, 0, 2));
    }

    #[test]
    fn test_partial_gang_rolls_back() {
        let mut nodes = pool(vec![
            node("a", Dimensions::new(1000, 0, 0)),
            node("b", Dimensions::new(1000, 0, 0)),
        ]);

        assert!(try_place(&mut nodes, Dimensions::new(1000, 0, 0), 3, true).is_none());
        assert_eq!(nodes["a"].remaining, Dimensions::new(1000, 0, 0));
        assert_eq!(nodes["b"].remaining, Dimensions::new(1000, 0, 0));
    }

    #[test]
    fn test_schedule_moves_job_to_ledger() {
        let mut s = Scheduler::new("test", SchedulerPolicy::default());
        let cap = Dimensions::new(4000, 1 << 30, 0);
        s.register_node("n1", cap, cap, false);
        s.register_job_in_queue("job-1", Dimensions::new(1000, 0, 0), 2, Utc::now(), HOUR)
            .unwrap();

        let placed = s.schedule(Utc::now());

        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].rank, 0);
        assert_eq!(placed[1].rank, 1);
        assert!(!s.is_queued("job-1"));
        assert_eq!(s.job_replicas("job-1").len(), 2);
        assert_eq!(s.node("n1").unwrap().remaining, Dimensions::new(2000, 1 << 30, 0));
        assert_eq!(s.tick(), 1);
    }

    #[test]
    fn test_without_backfill_pass_stops_at_first_failure() {
        let policy = SchedulerPolicy {
            backfill: false,
            ..SchedulerPolicy::default()
        };
        let mut s = Scheduler::new("test", policy);
        let cap = Dimensions::new(2000, 0, 0);
        s.register_node("n1", cap, cap, false);

        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(60);
        s.register_job_in_queue("big", Dimensions::new(4000, 0, 0), 1, earlier, HOUR)
            .unwrap();
        s.register_job_in_queue("small", Dimensions::new(1000, 0, 0), 1, now, HOUR)
            .unwrap();

        // "big" has waited longest but is larger; with equal weights age and
        // size cancel, and the id tie-break puts "big" first.
        assert!(s.schedule(now).is_empty());
        assert_eq!(s.queue().len(), 2);
    }

    #[test]
    fn test_backfill_places_around_blocked_job() {
        let mut s = Scheduler::new("test", SchedulerPolicy::default());
        let cap = Dimensions::new(2000, 0, 0);
        s.register_node("n1", cap, cap, false);

        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(60);
        s.register_job_in_queue("big", Dimensions::new(4000, 0, 0), 1, earlier, HOUR)
            .unwrap();
        s.register_job_in_queue("small", Dimensions::new(1000, 0, 0), 1, now, HOUR)
            .unwrap();

        let placed = s.schedule(now);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].job_id, "small");
        assert!(s.is_queued("big"));
    }

    #[test]
    fn test_can_place_does_not_mutate() {
        let mut s = Scheduler::new("test", SchedulerPolicy::default());
        let cap = Dimensions::new(2000, 0, 0);
        s.register_node("n1", cap, cap, false);

        assert!(s.can_place(Dimensions::new(1000, 0, 0), 2));
        assert!(!s.can_place(Dimensions::new(1000, 0, 0), 3));
        assert_eq!(s.node("n1").unwrap().remaining, cap);
    }
}
