//! Invariants that must hold over whole episodes of the lecture hall.
//!
//! - Obligations are conserved: every pair's ledgers mirror each other
//! - Admitted shifts never overfill a shoulder window
//! - A commitment is admitted at most once
//! - Trust stays in `[0, 1]` and strike totals never decrease

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use corridor_agent::{Agent, ClassroomAgent, IntervalStats};
use corridor_core::{AgentId, NegotiationConfig};
use corridor_sim::{EpisodeStats, Scenario, Simulation};
use proptest::prelude::*;

// ============================================================================
// Helper Functions
// ============================================================================

fn config() -> NegotiationConfig {
    NegotiationConfig::builder()
        .round_timeout(Duration::from_millis(150))
        .build()
        .unwrap()
}

fn assert_conserved(agents: &[ClassroomAgent]) {
    for room in agents {
        for other in agents.iter().filter(|other| other.id() != room.id()) {
            assert_eq!(
                room.core().ledger().balance(other.id()),
                -other.core().ledger().balance(room.id()),
                "{} and {} disagree",
                room.id(),
                other.id()
            );
        }
    }
}

fn assert_interval_invariants(interval: &IntervalStats, capacity: u32) {
    let earlier: u32 = interval.admitted().filter(|c| c.minutes < 0).map(|c| c.moved).sum();
    let later: u32 = interval.admitted().filter(|c| c.minutes > 0).map(|c| c.moved).sum();
    assert!(earlier <= capacity, "earlier shoulder holds {earlier}");
    assert!(later <= capacity, "later shoulder holds {later}");
    assert!(interval.moved <= interval.arrivals);

    for trust in interval.trust.values() {
        assert!((0.0..=1.0).contains(trust), "trust {trust} out of range");
    }
}

fn all_intervals(episodes: &[EpisodeStats]) -> impl Iterator<Item = &IntervalStats> {
    episodes.iter().flat_map(|e| e.intervals.iter())
}

async fn run(seed: u64, episodes: u32, intervals: u32) -> (Vec<EpisodeStats>, Vec<ClassroomAgent>) {
    let scenario = Scenario::lecture_hall(config(), seed).unwrap();
    let mut sim = Simulation::new(scenario).unwrap();
    let mut stats = Vec::new();
    for _ in 0..episodes {
        stats.push(sim.run_episode(intervals).await.unwrap());
    }
    let agents = sim.shutdown().await.unwrap();
    (stats, agents)
}

// ============================================================================
// Episode Invariants
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn obligations_are_conserved_across_episodes() {
    let (episodes, agents) = run(42, 2, 6).await;
    assert_eq!(episodes.len(), 2);
    assert_eq!(agents.len(), 3);
    assert_conserved(&agents);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forgiveness_between_episodes_keeps_conservation() {
    let scenario = Scenario::lecture_hall(config(), 7).unwrap();
    let mut sim = Simulation::new(scenario).unwrap();
    sim.run_episode(4).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let ids: Vec<AgentId> = sim.classroom_ids().cloned().collect();
    for creditor in &ids {
        let view = sim.classroom_view(creditor).unwrap();
        for (debtor, balance) in view.obligations {
            if balance > 0 {
                let forgiven = sim.forgive(creditor, &debtor, 1).await.unwrap();
                assert_eq!(forgiven, 1);
            }
        }
    }

    sim.run_episode(2).await.unwrap();
    let agents = sim.shutdown().await.unwrap();
    assert_conserved(&agents);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rounds_respect_capacity_and_admit_once() {
    let (episodes, _) = run(3, 2, 6).await;
    let capacity = config().capacity;

    let mut admitted = HashSet::new();
    for interval in all_intervals(&episodes) {
        assert_interval_invariants(interval, capacity);
        for record in interval.admitted() {
            assert!(admitted.insert(record.id), "{} admitted twice", record.id);
        }
    }

    // every admitted shift is settled exactly once, in a later interval
    let mut settled = HashSet::new();
    for interval in all_intervals(&episodes) {
        for record in &interval.resolved {
            assert!(admitted.contains(&record.id));
            assert!(settled.insert(record.id));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strike_totals_never_decrease() {
    let (episodes, _) = run(99, 2, 6).await;
    let mut last: BTreeMap<AgentId, u32> = BTreeMap::new();
    for interval in all_intervals(&episodes) {
        for (agent, total) in &interval.violations {
            let previous = last.get(agent).copied().unwrap_or(0);
            assert!(*total >= previous, "{agent} went from {previous} to {total}");
            last.insert(agent.clone(), *total);
        }
    }
    let violated: u32 = episodes.iter().map(|e| e.violated).sum();
    assert_eq!(last.values().sum::<u32>(), violated);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    #[test]
    fn any_seed_conserves_obligations(seed in any::<u64>()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (episodes, agents) = runtime.block_on(run(seed, 1, 4));
        assert_conserved(&agents);
        for interval in all_intervals(&episodes) {
            assert_interval_invariants(interval, config().capacity);
        }
    }
}
