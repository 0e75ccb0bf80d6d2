//! Capacity arbitration over the accepted offers of one round.
//!
//! Candidates are ranked by the bottleneck's trust in the proposer (highest
//! first), then by broker sequence, then by proposer id. Each admitted shift
//! moves part of the proposer's cohort into the earlier or later shoulder
//! window, and each shoulder holds at most one interval's capacity.

use std::cmp::Ordering;

use corridor_broker::{Proposal, RejectReason};
use corridor_core::{CongestionSnapshot, ShiftDirection};
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// An accepted offer waiting for arbitration.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The accepted proposal.
    pub proposal: Proposal,
    /// Broker sequence of the ACCEPT.
    pub seq: u64,
    /// Bottleneck's trust in the proposer.
    pub trust: f64,
}

/// Ranking order: trust desc, sequence asc, proposer id asc.
#[must_use]
pub fn ranking(a: &Candidate, b: &Candidate) -> Ordering {
    b.trust
        .total_cmp(&a.trust)
        .then_with(|| a.seq.cmp(&b.seq))
        .then_with(|| a.proposal.proposer.cmp(&b.proposal.proposer))
}

/// Outcome for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Admitted; `moved` students leave the interval.
    Admitted {
        /// Students moved into the shoulder window.
        moved: u32,
    },
    /// Refused for `reason`.
    Rejected(RejectReason),
}

/// A candidate with its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The candidate.
    pub candidate: Candidate,
    /// What arbitration decided.
    pub verdict: Verdict,
}

impl Decision {
    /// Returns true if admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self.verdict, Verdict::Admitted { .. })
    }
}

/// Result of arbitrating one round, in ranking order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Every candidate with its verdict.
    pub decisions: Vec<Decision>,
    /// Students moved out of the interval.
    pub moved: u32,
    /// Students moved into the earlier shoulder.
    pub earlier_load: u32,
    /// Students moved into the later shoulder.
    pub later_load: u32,
}

impl Allocation {
    /// Admitted decisions.
    pub fn admitted(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.is_admitted())
    }

    /// Rejected decisions.
    pub fn rejected(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| !d.is_admitted())
    }

    /// Checks that no window exceeds `capacity`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::CapacityOverbook` for the first overfull window.
    pub fn verify(&self, capacity: u32) -> AgentResult<()> {
        for (window, load) in [("earlier", self.earlier_load), ("later", self.later_load)] {
            if load > capacity {
                return Err(AgentError::CapacityOverbook {
                    window: window.to_string(),
                    load,
                    capacity,
                });
            }
        }
        let admitted: u32 = self
            .admitted()
            .map(|d| match d.verdict {
                Verdict::Admitted { moved } => moved,
                Verdict::Rejected(_) => 0,
            })
            .fold(0u32, u32::saturating_add);
        if admitted != self.moved {
            return Err(AgentError::CapacityOverbook {
                window: "interval".to_string(),
                load: admitted,
                capacity: self.moved,
            });
        }
        Ok(())
    }
}

/// Ranks `candidates` and admits shifts until the excess is cleared.
///
/// # Errors
///
/// Returns `AgentError::CapacityOverbook` if the final check fails; the
/// caller must then reject every candidate.
pub fn arbitrate(
    mut candidates: Vec<Candidate>,
    snapshot: &CongestionSnapshot,
) -> AgentResult<Allocation> {
    candidates.sort_by(ranking);

    let excess = snapshot.excess();
    let capacity = snapshot.capacity;
    let mut allocation = Allocation::default();

    for candidate in candidates {
        let verdict = if allocation.moved >= excess {
            Verdict::Rejected(RejectReason::Surplus)
        } else {
            let proposal = &candidate.proposal;
            let moved = snapshot.moved_by(&proposal.proposer, &proposal.adjustment);
            let load = match proposal.adjustment.direction() {
                ShiftDirection::Earlier => &mut allocation.earlier_load,
                ShiftDirection::Later => &mut allocation.later_load,
            };
            if moved == 0 {
                Verdict::Rejected(RejectReason::Surplus)
            } else if load.saturating_add(moved) > capacity {
                Verdict::Rejected(RejectReason::WouldOverbook)
            } else {
                *load += moved;
                allocation.moved = allocation.moved.saturating_add(moved);
                Verdict::Admitted { moved }
            }
        };
        debug!(
            proposer = %candidate.proposal.proposer,
            acceptor = %candidate.proposal.acceptor,
            adjustment = %candidate.proposal.adjustment,
            trust = candidate.trust,
            ?verdict,
            "arbitrated"
        );
        allocation.decisions.push(Decision { candidate, verdict });
    }

    allocation.verify(capacity)?;
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use corridor_core::{Adjustment, AgentId, CommitmentId, NegotiationConfig};

    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn snapshot(cohorts: &[(&str, u32)]) -> CongestionSnapshot {
        let config = NegotiationConfig::default();
        let per_agent: BTreeMap<_, _> = cohorts.iter().map(|(n, c)| (agent(n), *c)).collect();
        CongestionSnapshot::from_arrivals(per_agent, &config)
    }

    fn candidate(proposer: &str, acceptor: &str, minutes: i32, seq: u64, trust: f64) -> Candidate {
        Candidate {
            proposal: Proposal {
                commitment_id: CommitmentId::new(),
                coordinator: agent("Bottleneck"),
                interval: 1,
                proposer: agent(proposer),
                acceptor: agent(acceptor),
                adjustment: Adjustment::new(minutes, 10).unwrap(),
            },
            seq,
            trust,
        }
    }

    fn admitted_proposers(allocation: &Allocation) -> Vec<AgentId> {
        allocation
            .admitted()
            .map(|d| d.candidate.proposal.proposer.clone())
            .collect()
    }

    #[test]
    fn higher_trust_wins_joint_overbook() {
        // 110 arrivals, capacity 50; each cohort fits the earlier shoulder alone.
        let snap = snapshot(&[("A", 30), ("B", 30), ("C", 50)]);
        let low = candidate("A", "C", -4, 1, 0.4);
        let high = candidate("B", "C", -4, 2, 0.9);

        let allocation = arbitrate(vec![low, high], &snap).unwrap();

        assert_eq!(admitted_proposers(&allocation), vec![agent("B")]);
        let rejected: Vec<_> = allocation.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].verdict, Verdict::Rejected(RejectReason::WouldOverbook));
        assert_eq!(allocation.earlier_load, 30);
    }

    #[test]
    fn identical_trust_and_seq_break_on_proposer_id() {
        let snap = snapshot(&[("A", 30), ("B", 30), ("C", 50)]);
        let b = candidate("B", "C", -4, 7, 0.5);
        let a = candidate("A", "C", -4, 7, 0.5);

        let first = arbitrate(vec![b.clone(), a.clone()], &snap).unwrap();
        let second = arbitrate(vec![a, b], &snap).unwrap();

        assert_eq!(admitted_proposers(&first), vec![agent("A")]);
        assert_eq!(admitted_proposers(&first), admitted_proposers(&second));
    }

    #[test]
    fn earlier_receipt_wins_equal_trust() {
        let snap = snapshot(&[("A", 30), ("B", 30), ("C", 50)]);
        let late = candidate("A", "C", -4, 9, 0.5);
        let early = candidate("B", "C", -4, 3, 0.5);
        let allocation = arbitrate(vec![late, early], &snap).unwrap();
        assert_eq!(admitted_proposers(&allocation), vec![agent("B")]);
    }

    #[test]
    fn opposite_shoulders_both_fit() {
        let snap = snapshot(&[("A", 30), ("B", 30), ("C", 50)]);
        let earlier = candidate("A", "C", -4, 1, 0.5);
        let later = candidate("B", "C", 4, 2, 0.5);
        let allocation = arbitrate(vec![earlier, later], &snap).unwrap();
        assert_eq!(allocation.admitted().count(), 2);
        assert_eq!(allocation.moved, 60);
        assert_eq!((allocation.earlier_load, allocation.later_load), (30, 30));
    }

    #[test]
    fn cleared_excess_rejects_surplus() {
        // 70 arrivals, excess 20: the first shift clears it.
        let snap = snapshot(&[("A", 25), ("B", 25), ("C", 20)]);
        let first = candidate("A", "B", -4, 1, 0.5);
        let second = candidate("C", "B", 4, 2, 0.5);
        let allocation = arbitrate(vec![first, second], &snap).unwrap();
        assert_eq!(admitted_proposers(&allocation), vec![agent("A")]);
        assert_eq!(
            allocation.rejected().next().unwrap().verdict,
            Verdict::Rejected(RejectReason::Surplus)
        );
    }

    #[test]
    fn short_shift_moves_share_of_cohort() {
        // clearance 2 minutes: a 1 minute shift moves half the cohort
        let snap = snapshot(&[("A", 40), ("B", 40)]);
        let allocation = arbitrate(vec![candidate("A", "B", -1, 1, 0.5)], &snap).unwrap();
        assert_eq!(allocation.moved, 20);
    }

    #[test]
    fn staggered_exit_keeps_first_batch_in_interval() {
        // 100 arrivals, excess 50; A's staggered exit keeps 14 of 40 on time
        let snap = snapshot(&[("A", 40), ("B", 40), ("C", 20)]);
        let mut spread = candidate("A", "C", 4, 1, 0.9);
        spread.proposal.adjustment = Adjustment::staggered(4, 10).unwrap();
        let late = candidate("B", "C", 4, 2, 0.5);

        let allocation = arbitrate(vec![late, spread], &snap).unwrap();

        assert_eq!(admitted_proposers(&allocation), vec![agent("A")]);
        assert_eq!((allocation.earlier_load, allocation.later_load), (0, 26));
        assert_eq!(
            allocation.rejected().next().unwrap().verdict,
            Verdict::Rejected(RejectReason::WouldOverbook)
        );
    }

    #[test]
    fn huge_cohort_is_refused_without_overflow() {
        let snap = snapshot(&[("A", u32::MAX - 5), ("B", 30), ("C", 0)]);
        let small = candidate("B", "C", -4, 1, 0.9);
        let huge = candidate("A", "C", -4, 2, 0.1);

        let allocation = arbitrate(vec![huge, small], &snap).unwrap();

        assert_eq!(admitted_proposers(&allocation), vec![agent("B")]);
        assert_eq!(
            allocation.rejected().next().unwrap().verdict,
            Verdict::Rejected(RejectReason::WouldOverbook)
        );
        assert_eq!(allocation.earlier_load, 30);
    }

    #[test]
    fn verify_flags_overfull_window() {
        let allocation = Allocation {
            earlier_load: 51,
            ..Allocation::default()
        };
        assert!(matches!(
            allocation.verify(50),
            Err(AgentError::CapacityOverbook { load: 51, capacity: 50, .. })
        ));
    }

    #[test]
    fn empty_round_admits_nothing() {
        let snap = snapshot(&[("A", 40), ("B", 40)]);
        let allocation = arbitrate(Vec::new(), &snap).unwrap();
        assert!(allocation.decisions.is_empty());
        assert_eq!(allocation.moved, 0);
    }
}
