//! Placement properties of a single scheduler.

use std::collections::BTreeMap;
use std::time::Duration;

use compute_control_plane::scheduler::{Scheduler, SchedulerPolicy};
use compute_events::Dimensions;
use compute_testing::{at, dims, epoch};
use proptest::prelude::*;
use rstest::rstest;

const HOUR: Duration = Duration::from_secs(3600);

fn scheduler(policy: SchedulerPolicy) -> Scheduler {
    Scheduler::new("standard", policy)
}

fn add_node(scheduler: &mut Scheduler, name: &str, capacity: Dimensions) {
    scheduler.register_node(name, capacity, capacity, false);
}

fn queue(scheduler: &mut Scheduler, job_id: &str, request: Dimensions, replicas: u32, submitted_secs: i64) {
    scheduler
        .register_job_in_queue(job_id, request, replicas, at(submitted_secs), HOUR)
        .unwrap();
}

fn nodes_used(scheduler: &Scheduler) -> usize {
    scheduler
        .nodes()
        .filter(|node| node.remaining != node.capacity)
        .count()
}

// =============================================================================
// Scenarios
// =============================================================================

#[rstest]
#[case::compaction(true, 1)]
#[case::spread(false, 10)]
fn test_job_compaction(#[case] compaction: bool, #[case] expected_nodes: usize) {
    let mut s = scheduler(SchedulerPolicy {
        job_compaction: compaction,
        ..SchedulerPolicy::default()
    });
    for i in 0..10 {
        add_node(&mut s, &format!("node-{i:02}"), dims(10_000, 0, 0));
    }
    for i in 0..10 {
        queue(&mut s, &format!("job-{i:02}"), dims(1000, 0, 0), 1, i);
    }

    let placed = s.schedule(at(60));

    assert_eq!(placed.len(), 10);
    assert_eq!(nodes_used(&s), expected_nodes);
    assert!(s.queue().is_empty());
}

#[test]
fn test_degraded_limits_block_then_recover() {
    let capacity = dims(256_000, 0, 8);
    let mut s = scheduler(SchedulerPolicy::default());
    add_node(&mut s, "gpu-node", capacity);

    queue(&mut s, "first", dims(1000, 0, 6), 1, 0);
    assert_eq!(s.schedule(at(10)).len(), 1);

    // two GPUs fail: limits drop while capacity stays
    let degraded = Dimensions { gpu: 6, ..capacity };
    s.register_node("gpu-node", capacity, degraded, false);
    queue(&mut s, "second", dims(1000, 0, 2), 1, 20);
    assert!(s.schedule(at(30)).is_empty());
    assert!(s.is_queued("second"));
    assert_eq!(s.node("gpu-node").unwrap().capacity, capacity);

    s.register_node("gpu-node", capacity, capacity, false);
    let placed = s.schedule(at(40));
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].job_id, "second");
    assert_eq!(s.node("gpu-node").unwrap().remaining.gpu, 0);
}

#[test]
fn test_gang_is_placed_whole_or_not_at_all() {
    let mut s = scheduler(SchedulerPolicy::default());
    add_node(&mut s, "a", dims(10_000, 0, 0));
    add_node(&mut s, "b", dims(10_000, 0, 0));

    queue(&mut s, "gang", dims(6000, 0, 0), 3, 0);
    assert!(s.schedule(at(10)).is_empty());

    assert!(s.is_queued("gang"));
    assert!(!s.has_replicas("gang"));
    assert!(s.nodes().all(|node| node.remaining == node.capacity));
}

#[test]
fn test_multi_replica_ranks_in_order() {
    let mut s = scheduler(SchedulerPolicy::default());
    add_node(&mut s, "a", dims(4000, 0, 0));
    add_node(&mut s, "b", dims(4000, 0, 0));

    queue(&mut s, "gang", dims(3000, 0, 0), 2, 0);
    let placed = s.schedule(at(10));

    let ranks: Vec<u32> = placed.iter().map(|p| p.rank).collect();
    assert_eq!(ranks, vec![0, 1]);
    assert_ne!(placed[0].node, placed[1].node);
}

#[rstest]
#[case::backfill(true, vec!["small"])]
#[case::strict(false, vec![])]
fn test_backfill(#[case] backfill: bool, #[case] expected: Vec<&str>) {
    let mut s = scheduler(SchedulerPolicy {
        backfill,
        weight_job_size: 0.0,
        ..SchedulerPolicy::default()
    });
    add_node(&mut s, "a", dims(4000, 0, 0));

    queue(&mut s, "large", dims(8000, 0, 0), 1, 0);
    queue(&mut s, "small", dims(1000, 0, 0), 1, 30);

    let placed: Vec<String> = s.schedule(at(60)).into_iter().map(|p| p.job_id).collect();
    assert_eq!(placed, expected);
    assert!(s.is_queued("large"));
}

#[test]
fn test_unschedulable_node_is_skipped() {
    let mut s = scheduler(SchedulerPolicy::default());
    s.register_node("cordoned", dims(8000, 0, 0), dims(8000, 0, 0), true);
    add_node(&mut s, "open", dims(2000, 0, 0));

    queue(&mut s, "job", dims(1000, 0, 0), 1, 0);
    let placed = s.schedule(at(10));
    assert_eq!(placed[0].node, "open");
}

#[test]
fn test_reregistration_is_idempotent() {
    let capacity = dims(8000, 16 << 30, 1);
    let mut s = scheduler(SchedulerPolicy::default());
    add_node(&mut s, "n1", capacity);
    queue(&mut s, "job", dims(2000, 4 << 30, 1), 1, 0);
    s.schedule(at(10));

    let before = s.node("n1").unwrap().clone();
    for _ in 0..3 {
        s.register_node("n1", capacity, capacity, false);
    }
    let after = s.node("n1").unwrap();

    assert_eq!(after.remaining, before.remaining);
    assert_eq!(after.capacity, before.capacity);
    assert_eq!(s.node_names(), vec!["n1".to_string()]);
}

#[test]
fn test_older_job_places_first() {
    let mut s = scheduler(SchedulerPolicy {
        weight_job_size: 0.0,
        ..SchedulerPolicy::default()
    });
    add_node(&mut s, "a", dims(1000, 0, 0));

    queue(&mut s, "young", dims(1000, 0, 0), 1, 500);
    queue(&mut s, "old", dims(1000, 0, 0), 1, 0);

    let placed = s.schedule(at(600));
    assert_eq!(placed[0].job_id, "old");
}

#[test]
fn test_released_resources_return_on_prune() {
    let mut s = scheduler(SchedulerPolicy::default());
    add_node(&mut s, "a", dims(4000, 0, 0));
    queue(&mut s, "job", dims(3000, 0, 0), 1, 0);
    s.schedule(at(10));
    assert_eq!(s.node("a").unwrap().remaining, dims(1000, 0, 0));

    // next tick: the replica is reported running
    add_node(&mut s, "a", dims(4000, 0, 0));
    s.register_running_replica("job", 0, dims(3000, 0, 0), "a", HOUR);
    assert!(s.prune_replicas().is_empty());
    s.schedule(at(20));

    // and then goes silent
    add_node(&mut s, "a", dims(4000, 0, 0));
    let pruned = s.prune_replicas();
    assert_eq!(pruned.len(), 1);
    assert_eq!(s.node("a").unwrap().remaining, dims(4000, 0, 0));
}

// =============================================================================
// Properties
// =============================================================================

fn node_strategy() -> impl Strategy<Value = Dimensions> {
    (0i64..32_000, 0i64..(64 << 30), 0i64..8).prop_map(|(cpu, mem, gpu)| dims(cpu, mem, gpu))
}

fn job_strategy() -> impl Strategy<Value = (Dimensions, u32, i64)> {
    (
        (1i64..16_000, 0i64..(32 << 30), 0i64..4).prop_map(|(cpu, mem, gpu)| dims(cpu, mem, gpu)),
        1u32..4,
        0i64..3600,
    )
}

fn build(nodes: &[Dimensions], jobs: &[(Dimensions, u32, i64)], compaction: bool) -> Scheduler {
    let mut s = scheduler(SchedulerPolicy {
        job_compaction: compaction,
        ..SchedulerPolicy::default()
    });
    for (i, capacity) in nodes.iter().enumerate() {
        add_node(&mut s, &format!("node-{i}"), *capacity);
    }
    for (i, (request, replicas, submitted)) in jobs.iter().enumerate() {
        queue(&mut s, &format!("job-{i}"), *request, *replicas, *submitted);
    }
    s
}

proptest! {
    #[test]
    fn prop_conservation_and_no_over_allocation(
        nodes in prop::collection::vec(node_strategy(), 1..6),
        jobs in prop::collection::vec(job_strategy(), 0..20),
        compaction in any::<bool>(),
    ) {
        let mut s = build(&nodes, &jobs, compaction);
        s.schedule(at(7200));

        let mut bound: BTreeMap<String, Dimensions> = BTreeMap::new();
        for replica in s.replicas() {
            *bound.entry(replica.node.clone()).or_default() += replica.dimensions;
        }

        for node in s.nodes() {
            let used = bound.get(&node.name).copied().unwrap_or_default();
            prop_assert_eq!(node.remaining + used, node.capacity);
            prop_assert!(node.remaining.is_non_negative());
            prop_assert!(node.limits.satisfies(&node.usage()));
        }
    }

    #[test]
    fn prop_each_job_is_queued_or_fully_placed(
        nodes in prop::collection::vec(node_strategy(), 1..6),
        jobs in prop::collection::vec(job_strategy(), 0..20),
    ) {
        let mut s = build(&nodes, &jobs, true);
        s.schedule(at(7200));

        for (i, (_, replicas, _)) in jobs.iter().enumerate() {
            let job_id = format!("job-{i}");
            let placed = s.job_replicas(&job_id);
            let queued = s.is_queued(&job_id);

            prop_assert!(queued != !placed.is_empty());
            if !queued {
                let ranks: Vec<u32> = placed.iter().map(|r| r.rank).collect();
                prop_assert_eq!(ranks, (0..*replicas).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn prop_scheduling_is_deterministic(
        nodes in prop::collection::vec(node_strategy(), 1..6),
        jobs in prop::collection::vec(job_strategy(), 0..20),
        compaction in any::<bool>(),
    ) {
        let mut a = build(&nodes, &jobs, compaction);
        let mut b = build(&nodes, &jobs, compaction);

        prop_assert_eq!(a.schedule(at(7200)), b.schedule(at(7200)));
    }

    #[test]
    fn prop_priority_never_decreases_while_queued(
        jobs in prop::collection::vec(job_strategy(), 2..12),
        later in 1i64..86_400,
    ) {
        // no nodes, so nothing leaves the queue
        let mut s = build(&[], &jobs, true);
        s.schedule(epoch() + chrono::Duration::hours(1));
        let first: BTreeMap<String, f64> =
            s.queue().iter().map(|e| (e.job_id.clone(), e.priority)).collect();

        s.schedule(epoch() + chrono::Duration::hours(1) + chrono::Duration::seconds(later));
        for entry in s.queue() {
            prop_assert!(entry.priority >= first[&entry.job_id] - 1e-9);
        }
    }
}
