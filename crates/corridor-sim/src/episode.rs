//! Episode-level aggregation of interval statistics.

use std::collections::BTreeMap;

use corridor_agent::{IntervalStats, RoundOutcome};
use corridor_core::{AgentId, CommitmentState};
use serde::{Deserialize, Serialize};

/// Totals over one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    /// Episode number, starting at 1.
    pub episode: u64,
    /// Per-interval statistics in order.
    pub intervals: Vec<IntervalStats>,
    /// Intervals that opened a round.
    pub negotiations: u32,
    /// Rounds that admitted at least one commitment.
    pub resolved_rounds: u32,
    /// Rounds cancelled because risk subsided.
    pub cancelled_rounds: u32,
    /// Commitments admitted.
    pub admitted: u32,
    /// Commitments rejected by arbitration.
    pub rejected: u32,
    /// Commitments fulfilled.
    pub fulfilled: u32,
    /// Commitments violated.
    pub violated: u32,
    /// Negotiation threads that timed out.
    pub timeouts: u32,
    /// Mean post-negotiation utilization.
    pub mean_utilization: f64,
    /// Sum of clearance minutes saved.
    pub clearance_saved_mins: u32,
    /// Bottleneck's trust at the end of the episode.
    pub trust: BTreeMap<AgentId, f64>,
    /// Cumulative strikes at the end of the episode.
    pub violations: BTreeMap<AgentId, u32>,
}

impl EpisodeStats {
    /// Aggregates the intervals of episode `episode`.
    #[must_use]
    pub fn from_intervals(episode: u64, intervals: Vec<IntervalStats>) -> Self {
        let mut stats = Self {
            episode,
            ..Self::default()
        };
        for interval in &intervals {
            if interval.round.is_some() {
                stats.negotiations += 1;
            }
            match interval.outcome {
                RoundOutcome::Resolved => stats.resolved_rounds += 1,
                RoundOutcome::Cancelled => stats.cancelled_rounds += 1,
                RoundOutcome::NoNegotiation | RoundOutcome::Unresolved | RoundOutcome::Aborted => {}
            }
            for record in &interval.commitments {
                match record.state {
                    CommitmentState::Accepted => stats.admitted += 1,
                    CommitmentState::Rejected => stats.rejected += 1,
                    _ => {}
                }
            }
            for record in &interval.resolved {
                match record.state {
                    CommitmentState::Fulfilled => stats.fulfilled += 1,
                    CommitmentState::Violated => stats.violated += 1,
                    _ => {}
                }
            }
            stats.timeouts += interval.timeouts;
            stats.clearance_saved_mins += interval.clearance_improvement_mins;
        }
        if !intervals.is_empty() {
            let total: f64 = intervals.iter().map(|i| i.utilization).sum();
            stats.mean_utilization = total / intervals.len() as f64;
        }
        if let Some(last) = intervals.last() {
            stats.trust.clone_from(&last.trust);
            stats.violations.clone_from(&last.violations);
        }
        stats.intervals = intervals;
        stats
    }
}

#[cfg(test)]
mod tests {
    use corridor_agent::CommitmentRecord;
    use corridor_core::{Adjustment, Commitment, CommitmentId, RoundId};

    use super::*;

    fn record(state: CommitmentState) -> CommitmentRecord {
        let mut c = Commitment::propose(
            CommitmentId::new(),
            RoundId::new(),
            1,
            AgentId::new("A").unwrap(),
            AgentId::new("B").unwrap(),
            Adjustment::new(-3, 10).unwrap(),
        )
        .unwrap();
        match state {
            CommitmentState::Accepted => c.accept().unwrap(),
            CommitmentState::Rejected => c.reject().unwrap(),
            CommitmentState::Fulfilled => {
                c.accept().unwrap();
                c.fulfill().unwrap();
            }
            CommitmentState::Violated => {
                c.accept().unwrap();
                c.violate().unwrap();
            }
            CommitmentState::Proposed => {}
        }
        CommitmentRecord::of(&c)
    }

    #[test]
    fn aggregates_outcomes() {
        let calm = IntervalStats {
            interval: 1,
            utilization: 0.5,
            ..IntervalStats::default()
        };
        let busy = IntervalStats {
            interval: 2,
            round: Some(RoundId::new()),
            outcome: RoundOutcome::Resolved,
            commitments: vec![record(CommitmentState::Accepted), record(CommitmentState::Rejected)],
            utilization: 1.0,
            clearance_improvement_mins: 2,
            timeouts: 1,
            ..IntervalStats::default()
        };
        let after = IntervalStats {
            interval: 3,
            resolved: vec![record(CommitmentState::Fulfilled)],
            utilization: 0.6,
            trust: BTreeMap::from([(AgentId::new("A").unwrap(), 0.6)]),
            ..IntervalStats::default()
        };

        let stats = EpisodeStats::from_intervals(1, vec![calm, busy, after]);

        assert_eq!(stats.negotiations, 1);
        assert_eq!(stats.resolved_rounds, 1);
        assert_eq!((stats.admitted, stats.rejected), (1, 1));
        assert_eq!((stats.fulfilled, stats.violated), (1, 0));
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.clearance_saved_mins, 2);
        assert!((stats.mean_utilization - 0.7).abs() < 1e-9);
        assert_eq!(stats.trust.len(), 1);
        assert_eq!(stats.intervals.len(), 3);
    }

    #[test]
    fn empty_episode() {
        let stats = EpisodeStats::from_intervals(4, Vec::new());
        assert_eq!(stats.episode, 4);
        assert!(stats.mean_utilization.abs() < f64::EPSILON);
    }
}
