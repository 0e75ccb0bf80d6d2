//! Per-interval statistics emitted by the bottleneck.

use std::collections::BTreeMap;
use std::fmt;

use corridor_broker::RejectReason;
use corridor_core::{
    AgentId, Commitment, CommitmentId, CommitmentState, CongestionSnapshot, ExitKind, RoundId,
};
use serde::{Deserialize, Serialize};

/// How an interval's negotiation ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Risk stayed at or below the threshold.
    #[default]
    NoNegotiation,
    /// At least one commitment was admitted.
    Resolved,
    /// Negotiation ran but nothing was admitted; natural flow.
    Unresolved,
    /// Risk dropped mid-round and the round was cancelled.
    Cancelled,
    /// The capacity check failed and every candidate was rejected.
    Aborted,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoNegotiation => "no_negotiation",
            Self::Resolved => "resolved",
            Self::Unresolved => "unresolved",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A commitment as reported in statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    /// Commitment id.
    pub id: CommitmentId,
    /// Round that produced it.
    pub round: RoundId,
    /// Interval it governs.
    pub interval: u64,
    /// Classroom that shifts.
    pub proposer: AgentId,
    /// Classroom favored.
    pub acceptor: AgentId,
    /// Signed shift.
    pub minutes: i32,
    /// How the proposer releases its cohort.
    pub kind: ExitKind,
    /// State after this interval.
    pub state: CommitmentState,
    /// Why it was rejected.
    pub reason: Option<RejectReason>,
    /// Students moved, for admitted commitments.
    pub moved: u32,
}

impl CommitmentRecord {
    /// Record of `commitment` in its current state.
    #[must_use]
    pub fn of(commitment: &Commitment) -> Self {
        Self {
            id: commitment.id,
            round: commitment.round,
            interval: commitment.interval,
            proposer: commitment.proposer.clone(),
            acceptor: commitment.acceptor.clone(),
            kind: commitment.adjustment.kind(),
            minutes: commitment.adjustment.minutes(),
            state: commitment.state,
            reason: None,
            moved: 0,
        }
    }

    /// Adds a rejection reason.
    #[must_use]
    pub const fn with_reason(mut self, reason: RejectReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Adds the students moved.
    #[must_use]
    pub const fn with_moved(mut self, moved: u32) -> Self {
        self.moved = moved;
        self
    }
}

/// What happened in one interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    /// Interval number, starting at 1.
    pub interval: u64,
    /// Expected arrivals before negotiation.
    pub arrivals: u32,
    /// Congestion risk before negotiation.
    pub risk: f64,
    /// Negotiation outcome.
    pub outcome: RoundOutcome,
    /// Round id, when a round was opened.
    pub round: Option<RoundId>,
    /// Commitments created this interval, admitted or rejected.
    pub commitments: Vec<CommitmentRecord>,
    /// Previous-interval commitments resolved this interval.
    pub resolved: Vec<CommitmentRecord>,
    /// Bottleneck's trust in each classroom.
    pub trust: BTreeMap<AgentId, f64>,
    /// Cumulative strikes per classroom.
    pub violations: BTreeMap<AgentId, u32>,
    /// Students moved out of the interval.
    pub moved: u32,
    /// Arrivals after adjustments over capacity (above 1 means overflow).
    pub utilization: f64,
    /// Clearance minutes saved by the admitted shifts.
    pub clearance_improvement_mins: u32,
    /// Negotiation threads that timed out.
    pub timeouts: u32,
    /// Classrooms that did not report in time.
    pub missing_reports: Vec<AgentId>,
}

impl IntervalStats {
    /// Stats seeded from the monitoring snapshot.
    #[must_use]
    pub fn new(interval: u64, snapshot: &CongestionSnapshot) -> Self {
        Self {
            interval,
            arrivals: snapshot.arrivals,
            risk: snapshot.risk(),
            ..Self::default()
        }
    }

    /// Fills the flow figures once `moved` students left the interval.
    pub fn record_flow(&mut self, snapshot: &CongestionSnapshot, moved: u32) {
        let remaining = snapshot.arrivals.saturating_sub(moved);
        self.moved = moved;
        self.utilization = if snapshot.capacity == 0 {
            0.0
        } else {
            f64::from(remaining) / f64::from(snapshot.capacity)
        };
        self.clearance_improvement_mins = snapshot
            .clearance_minutes(snapshot.arrivals)
            .saturating_sub(snapshot.clearance_minutes(remaining));
    }

    /// Admitted commitments.
    pub fn admitted(&self) -> impl Iterator<Item = &CommitmentRecord> {
        self.commitments
            .iter()
            .filter(|c| c.state == CommitmentState::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use corridor_core::NegotiationConfig;

    use super::*;

    #[test]
    fn flow_figures() {
        let config = NegotiationConfig::default();
        let snapshot = CongestionSnapshot::from_total(80, &config);
        let mut stats = IntervalStats::new(4, &snapshot);
        stats.record_flow(&snapshot, 30);

        assert_eq!(stats.arrivals, 80);
        assert!((stats.risk - 0.6).abs() < 1e-9);
        assert!((stats.utilization - 1.0).abs() < 1e-9);
        // 80 students: 2 batches, 50 students: 1 batch, 2 minutes each
        assert_eq!(stats.clearance_improvement_mins, 2);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&RoundOutcome::NoNegotiation).unwrap();
        assert_eq!(json, "\"no_negotiation\"");
        assert_eq!(RoundOutcome::Aborted.to_string(), "aborted");
    }
}
