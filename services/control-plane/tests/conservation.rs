//! Resource accounting across many coordinator ticks.
//!
//! A small simulated backend starts dispatched replicas after a random delay,
//! loses running replicas at random and publishes usage snapshots that may be
//! stale. After every tick no node may carry more than its capacity, neither
//! in the scheduler's ledger nor in the backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use compute_control_plane::coordinator::{Coordinator, CoordinatorSettings, Dispatch, TickInput};
use compute_control_plane::handoff::HandoffBuffer;
use compute_control_plane::scheduler::{SchedulerPolicy, SchedulerSet};
use compute_control_plane::sink::RecordingSink;
use compute_events::{Dimensions, InventorySnapshot};
use compute_testing::{at, job, node, running_on, snapshot, DEFAULT_CLASS};
use proptest::prelude::*;
use proptest::sample::Index;
use proptest::test_runner::TestCaseError;

#[derive(Debug, Clone)]
struct Step {
    /// `(cpu_millis, gpu, replicas)` per submitted job.
    submissions: Vec<(i64, i64, u32)>,

    /// Ticks each new dispatch waits before its executor starts it.
    dispatch_delays: Vec<u8>,

    /// Running replicas that vanish after the tick.
    lost: Vec<Index>,

    /// Fresh usage per node in percent of capacity; `None` keeps the
    /// previous snapshot.
    usage: Option<Vec<u8>>,
}

struct Cluster {
    coordinator: Coordinator,
    inventory: InventorySnapshot,
    running: BTreeMap<(String, u32), (String, Dimensions)>,
    in_flight: Vec<(Dispatch, u8)>,
    next_job: usize,
}

impl Cluster {
    fn new(nodes: &[(i64, i64)], compaction: bool) -> Self {
        let policy = SchedulerPolicy {
            job_compaction: compaction,
            ..SchedulerPolicy::default()
        };
        let coordinator = Coordinator::new(
            SchedulerSet::new(policy),
            Vec::new(),
            CoordinatorSettings::default(),
            Arc::new(RecordingSink::new()),
        );
        let inventory = snapshot(
            nodes
                .iter()
                .enumerate()
                .map(|(i, (cpu, gpu))| node(&format!("node-{i}")).cpu(*cpu).gpu(*gpu).build()),
        );

        Self {
            coordinator,
            inventory,
            running: BTreeMap::new(),
            in_flight: Vec::new(),
            next_job: 0,
        }
    }

    fn step(&mut self, t: i64, step: &Step) -> Result<(), TestCaseError> {
        let now = at(t * 15);

        let observations = self
            .running
            .iter()
            .map(|((job_id, rank), (node, _))| running_on(job_id, *rank, node))
            .collect();

        let mut started = Vec::new();
        let mut arriving = Vec::new();
        for (dispatch, delay) in std::mem::take(&mut self.in_flight) {
            if delay == 0 {
                started.push((dispatch.job.job_id.clone(), dispatch.rank));
                arriving.push(dispatch);
            } else {
                self.in_flight.push((dispatch, delay - 1));
            }
        }

        let mut submissions = Vec::new();
        for (cpu, gpu, replicas) in &step.submissions {
            self.next_job += 1;
            submissions.push(
                job(&format!("job-{:03}", self.next_job))
                    .cpu(*cpu)
                    .gpu(*gpu)
                    .replicas(*replicas)
                    .submitted_at(now)
                    .build(),
            );
        }

        if let Some(percent) = &step.usage {
            let usage = self
                .inventory
                .nodes
                .iter()
                .zip(percent.iter().cycle())
                .map(|(node, pct)| {
                    let pct = i64::from(*pct);
                    let cap = node.capacity;
                    (
                        node.name.clone(),
                        Dimensions::new(cap.cpu_millis * pct / 100, 0, cap.gpu * pct / 100),
                    )
                })
                .collect();
            self.inventory.usage = Some(usage);
        }

        let output = self.coordinator.tick(TickInput {
            now,
            inventory: &self.inventory,
            observations,
            handoff: HandoffBuffer {
                submissions,
                started_dispatches: started,
                ..HandoffBuffer::default()
            },
        });

        // The executor finishes starting these after the monitor ran.
        let terminated: BTreeSet<String> = output
            .terminations
            .iter()
            .map(|request| request.job.job_id.clone())
            .collect();
        for dispatch in arriving {
            self.running.insert(
                (dispatch.job.job_id, dispatch.rank),
                (dispatch.node, dispatch.job.dimensions),
            );
        }
        self.running.retain(|(job_id, _), _| !terminated.contains(job_id));
        self.in_flight
            .retain(|(dispatch, _)| !terminated.contains(&dispatch.job.job_id));

        for (i, dispatch) in output.dispatches.into_iter().enumerate() {
            let delay = step.dispatch_delays[i % step.dispatch_delays.len()];
            self.in_flight.push((dispatch, delay));
        }

        for index in &step.lost {
            if self.running.is_empty() {
                break;
            }
            let key = self.running.keys().nth(index.index(self.running.len())).cloned();
            if let Some(key) = key {
                self.running.remove(&key);
            }
        }

        self.check(t)
    }

    fn check(&self, t: i64) -> Result<(), TestCaseError> {
        let Some(scheduler) = self.coordinator.schedulers().get(DEFAULT_CLASS) else {
            return Ok(());
        };

        let mut bound: BTreeMap<&str, Dimensions> = BTreeMap::new();
        for replica in scheduler.replicas() {
            *bound.entry(replica.node.as_str()).or_default() += replica.dimensions;
        }

        let mut load: BTreeMap<&str, Dimensions> = BTreeMap::new();
        for (node, dimensions) in self.running.values() {
            *load.entry(node.as_str()).or_default() += *dimensions;
        }
        for (dispatch, _) in &self.in_flight {
            *load.entry(dispatch.node.as_str()).or_default() += dispatch.job.dimensions;
        }

        for node in scheduler.nodes() {
            let bound = bound.get(node.name.as_str()).copied().unwrap_or_default();
            let load = load.get(node.name.as_str()).copied().unwrap_or_default();

            prop_assert!(
                node.capacity.satisfies(&bound),
                "tick {}: {} binds {} over capacity {}",
                t,
                node.name,
                bound,
                node.capacity
            );
            prop_assert!(
                node.remaining.is_non_negative(),
                "tick {}: {} remaining {}",
                t,
                node.name,
                node.remaining
            );
            prop_assert!(
                node.capacity.satisfies(&load),
                "tick {}: {} runs {} over capacity {}",
                t,
                node.name,
                load,
                node.capacity
            );
        }
        Ok(())
    }
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (
        prop::collection::vec((1i64..6000, 0i64..3, 1u32..4), 0..3),
        prop::collection::vec(0u8..3, 1..4),
        prop::collection::vec(any::<Index>(), 0..2),
        prop::option::of(prop::collection::vec(0u8..=100, 1..4)),
    )
        .prop_map(|(submissions, dispatch_delays, lost, usage)| Step {
            submissions,
            dispatch_delays,
            lost,
            usage,
        })
}

proptest! {
    #[test]
    fn prop_nodes_never_exceed_capacity_across_ticks(
        nodes in prop::collection::vec((1000i64..8000, 0i64..4), 1..4),
        steps in prop::collection::vec(step_strategy(), 1..16),
        compaction in any::<bool>(),
    ) {
        let mut cluster = Cluster::new(&nodes, compaction);
        for (t, step) in steps.iter().enumerate() {
            cluster.step(t as i64, step)?;
        }
    }
}
