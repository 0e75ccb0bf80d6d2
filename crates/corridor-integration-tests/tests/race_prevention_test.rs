//! Integration tests for the broker's mutual-exclusion and ordering
//! guarantees under concurrent publishers.
//!
//! 1. Concurrent ACCEPTs for one pair and round: exactly one wins
//! 2. Per-sender FIFO with many senders on many threads
//! 3. Cancellation racing with ACCEPTs leaves no live commitment

use std::sync::Arc;

use corridor_broker::{BrokerError, Message, MessageBroker, Payload, Proposal, RoundStatus};
use corridor_core::{Adjustment, AgentId, CommitmentId, RoundId};

// ============================================================================
// Helper Functions
// ============================================================================

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

fn hub() -> AgentId {
    agent("Bottleneck")
}

fn accept(sender: &str, proposer: &str, acceptor: &str, round: RoundId) -> Message {
    let proposal = Proposal {
        commitment_id: CommitmentId::new(),
        coordinator: hub(),
        interval: 1,
        proposer: agent(proposer),
        acceptor: agent(acceptor),
        adjustment: Adjustment::new(-3, 10).unwrap(),
    };
    Message::to(agent(sender), hub(), Some(round), Payload::Accept(proposal))
}

// ============================================================================
// Pair Exclusion
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_admit_one_per_pair() {
    let broker = Arc::new(MessageBroker::new());
    let mut hub_box = broker.subscribe(hub()).unwrap();
    let round = RoundId::new();
    broker.open_round(round, hub());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let broker = Arc::clone(&broker);
        // both directions of the same pair
        let (proposer, acceptor) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
        tasks.push(tokio::spawn(async move {
            broker.publish(accept(acceptor, proposer, acceptor, round))
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(BrokerError::PairConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(conflicts, 31);
    assert_eq!(hub_box.drain().len(), 1);
    assert!(broker.live_commitment(&agent("A"), &agent("B"), round).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_pairs_do_not_block_each_other() {
    let broker = Arc::new(MessageBroker::new());
    let mut hub_box = broker.subscribe(hub()).unwrap();
    let round = RoundId::new();
    broker.open_round(round, hub());

    let pairs = [("A", "B"), ("A", "C"), ("B", "C"), ("C", "D")];
    let mut tasks = Vec::new();
    for (proposer, acceptor) in pairs {
        let broker = Arc::clone(&broker);
        tasks.push(tokio::spawn(async move {
            broker.publish(accept(acceptor, proposer, acceptor, round))
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(hub_box.drain().len(), pairs.len());
}

#[tokio::test]
async fn same_pair_in_another_round_is_independent() {
    let broker = MessageBroker::new();
    let _hub_box = broker.subscribe(hub()).unwrap();
    let first = RoundId::new();
    let second = RoundId::new();
    broker.open_round(first, hub());
    broker.open_round(second, hub());

    assert!(broker.publish(accept("B", "A", "B", first)).is_ok());
    assert!(broker.publish(accept("B", "A", "B", second)).is_ok());
    assert!(matches!(
        broker.publish(accept("A", "B", "A", first)),
        Err(BrokerError::PairConflict { .. })
    ));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_sender_fifo_across_threads() {
    let broker = Arc::new(MessageBroker::new());
    let mut sink = broker.subscribe(agent("Sink")).unwrap();
    let senders = ["S1", "S2", "S3", "S4"];

    let mut tasks = Vec::new();
    for sender in senders {
        let broker = Arc::clone(&broker);
        tasks.push(tokio::spawn(async move {
            for interval in 0..200 {
                broker
                    .publish(Message::to(
                        agent(sender),
                        agent("Sink"),
                        None,
                        Payload::IntervalTick { interval },
                    ))
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let envelopes = sink.drain();
    assert_eq!(envelopes.len(), 800);
    assert!(envelopes.windows(2).all(|w| w[0].seq < w[1].seq));
    for sender in senders {
        let intervals: Vec<u64> = envelopes
            .iter()
            .filter(|e| e.sender() == &agent(sender))
            .filter_map(|e| match e.payload() {
                Payload::IntervalTick { interval } => Some(*interval),
                _ => None,
            })
            .collect();
        assert_eq!(intervals, (0..200).collect::<Vec<_>>());
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_racing_accepts_leaves_nothing_live() {
    let broker = Arc::new(MessageBroker::new());
    let _hub_box = broker.subscribe(hub()).unwrap();
    let round = RoundId::new();
    broker.open_round(round, hub());

    let names = ["A", "B", "C", "D", "E", "F"];
    let mut tasks = Vec::new();
    for (i, proposer) in names.iter().enumerate() {
        let acceptor = names[(i + 1) % names.len()];
        let broker = Arc::clone(&broker);
        let proposer = *proposer;
        tasks.push(tokio::spawn(async move {
            broker.publish(accept(acceptor, proposer, acceptor, round))
        }));
    }
    broker.cancel_round(round);

    for task in tasks {
        match task.await.unwrap() {
            Ok(_) | Err(BrokerError::RoundCancelled(_) | BrokerError::PairConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // accepts that won the race before cancellation were swept by it, and
    // later ones were refused
    for (i, proposer) in names.iter().enumerate() {
        let acceptor = names[(i + 1) % names.len()];
        assert!(broker.live_commitment(&agent(proposer), &agent(acceptor), round).is_none());
    }
    assert_eq!(broker.round_status(round), Some(RoundStatus::Cancelled));
    assert!(matches!(
        broker.publish(accept("B", "A", "B", round)),
        Err(BrokerError::RoundCancelled(_))
    ));
}
