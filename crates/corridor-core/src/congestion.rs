//! Congestion snapshot and the discrete batch model of the corridor.
//!
//! The corridor clears `capacity` students per batch, one batch every
//! `clearance_time_mins`. Risk is the fraction of capacity by which expected
//! arrivals overflow one interval, capped at 1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::commitment::{Adjustment, ExitKind};
use crate::config::NegotiationConfig;
use crate::ids::AgentId;

/// Observed arrivals for one interval, with the derived risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionSnapshot {
    /// Total expected simultaneous arrivals.
    pub arrivals: u32,
    /// Arrivals broken down by classroom (empty when only a total is known).
    pub per_agent: BTreeMap<AgentId, u32>,
    /// Configured capacity per interval.
    pub capacity: u32,
    /// Configured clearance time per batch.
    pub clearance_time_mins: u32,
    /// Configured spacing of staggered exit batches.
    #[serde(default)]
    pub batch_spacing_mins: u32,
    risk: f64,
}

impl CongestionSnapshot {
    /// Snapshot from per-classroom arrivals.
    #[must_use]
    pub fn from_arrivals(per_agent: BTreeMap<AgentId, u32>, config: &NegotiationConfig) -> Self {
        let arrivals = per_agent.values().copied().fold(0u32, u32::saturating_add);
        Self {
            arrivals,
            risk: risk_for(arrivals, config.capacity),
            per_agent,
            capacity: config.capacity,
            clearance_time_mins: config.clearance_time_mins,
            batch_spacing_mins: config.batch_spacing_mins,
        }
    }

    /// Snapshot from a total only.
    #[must_use]
    pub fn from_total(arrivals: u32, config: &NegotiationConfig) -> Self {
        Self {
            arrivals,
            per_agent: BTreeMap::new(),
            capacity: config.capacity,
            clearance_time_mins: config.clearance_time_mins,
            batch_spacing_mins: config.batch_spacing_mins,
            risk: risk_for(arrivals, config.capacity),
        }
    }

    /// Derived congestion risk in `[0, 1]`.
    #[must_use]
    pub const fn risk(&self) -> f64 {
        self.risk
    }

    /// Students above capacity.
    #[must_use]
    pub const fn excess(&self) -> u32 {
        self.arrivals.saturating_sub(self.capacity)
    }

    /// Returns true if risk is strictly above `threshold`.
    #[must_use]
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.risk > threshold
    }

    /// Cohort of a single classroom.
    #[must_use]
    pub fn cohort(&self, agent: &AgentId) -> u32 {
        self.per_agent.get(agent).copied().unwrap_or(0)
    }

    /// Students `agent` takes out of the interval with `adjustment`.
    #[must_use]
    pub fn moved_by(&self, agent: &AgentId, adjustment: &Adjustment) -> u32 {
        let cohort = self.cohort(agent);
        match adjustment.kind() {
            ExitKind::Staggered => {
                staggered_students(cohort, adjustment.magnitude(), self.batch_spacing_mins)
            }
            ExitKind::Early | ExitKind::Late => {
                moved_students(cohort, adjustment.magnitude(), self.clearance_time_mins)
            }
        }
    }

    /// Minutes needed to clear `load` students.
    #[must_use]
    pub const fn clearance_minutes(&self, load: u32) -> u32 {
        clearance_minutes(load, self.capacity, self.clearance_time_mins)
    }
}

/// One batch of a staggered exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitBatch {
    /// Minutes after the scheduled end.
    pub offset_mins: u32,
    /// Students released.
    pub students: u32,
}

/// Splits `cohort` into batches `batch_spacing_mins` apart covering `span`
/// minutes. Earlier batches take the remainder.
#[must_use]
pub fn exit_batches(cohort: u32, span: u32, batch_spacing_mins: u32) -> Vec<ExitBatch> {
    if cohort == 0 {
        return Vec::new();
    }
    let count = batch_count(cohort, span, batch_spacing_mins);
    let (base, extra) = (cohort / count, cohort % count);
    (0..count)
        .map(|i| ExitBatch {
            offset_mins: i.saturating_mul(batch_spacing_mins),
            students: base + u32::from(i < extra),
        })
        .collect()
}

const fn batch_count(cohort: u32, span: u32, batch_spacing_mins: u32) -> u32 {
    if batch_spacing_mins == 0 {
        return 1;
    }
    let count = span / batch_spacing_mins + 1;
    if count < cohort { count } else { cohort }
}

/// Students a staggered exit over `span` minutes keeps out of the interval:
/// everyone except the first batch.
#[must_use]
pub const fn staggered_students(cohort: u32, span: u32, batch_spacing_mins: u32) -> u32 {
    if cohort == 0 {
        return 0;
    }
    let count = batch_count(cohort, span, batch_spacing_mins);
    cohort - cohort.div_ceil(count)
}

/// `min(1, max(0, arrivals − capacity) / capacity)`.
#[must_use]
pub fn risk_for(arrivals: u32, capacity: u32) -> f64 {
    if capacity == 0 {
        return if arrivals == 0 { 0.0 } else { 1.0 };
    }
    let excess = f64::from(arrivals.saturating_sub(capacity));
    (excess / f64::from(capacity)).min(1.0)
}

/// Students a shift of `magnitude` minutes moves out of the interval.
///
/// A shift of one full clearance period or more moves the whole cohort;
/// shorter shifts move a proportional share.
#[must_use]
pub const fn moved_students(cohort: u32, magnitude: u32, clearance_time_mins: u32) -> u32 {
    if clearance_time_mins == 0 || magnitude >= clearance_time_mins {
        return cohort;
    }
    ((cohort as u64 * magnitude as u64) / clearance_time_mins as u64) as u32
}

/// `ceil(load / capacity) × clearance_time_mins`.
#[must_use]
pub const fn clearance_minutes(load: u32, capacity: u32, clearance_time_mins: u32) -> u32 {
    if capacity == 0 {
        return 0;
    }
    load.div_ceil(capacity).saturating_mul(clearance_time_mins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config(capacity: u32) -> NegotiationConfig {
        NegotiationConfig::builder().capacity(capacity).build().unwrap()
    }

    #[test]
    fn eighty_arrivals_over_fifty_capacity() {
        let snapshot = CongestionSnapshot::from_total(80, &config(50));
        assert!((snapshot.risk() - 0.6).abs() < 1e-9);
        assert!(snapshot.exceeds(0.4));
        assert_eq!(snapshot.excess(), 30);
    }

    #[test_case(0, 50, 0.0 ; "empty corridor")]
    #[test_case(50, 50, 0.0 ; "exactly at capacity")]
    #[test_case(60, 50, 0.2 ; "slight overflow")]
    #[test_case(100, 50, 1.0 ; "double capacity")]
    #[test_case(400, 50, 1.0 ; "capped at one")]
    fn risk_formula(arrivals: u32, capacity: u32, expected: f64) {
        assert!((risk_for(arrivals, capacity) - expected).abs() < 1e-9);
    }

    #[test]
    fn threshold_is_strict() {
        let snapshot = CongestionSnapshot::from_total(70, &config(50));
        assert!(!snapshot.exceeds(0.4));
    }

    #[test]
    fn per_agent_arrivals_sum() {
        let mut per_agent = BTreeMap::new();
        per_agent.insert(AgentId::new("A").unwrap(), 30);
        per_agent.insert(AgentId::new("B").unwrap(), 45);
        let snapshot = CongestionSnapshot::from_arrivals(per_agent, &config(50));
        assert_eq!(snapshot.arrivals, 75);
        assert_eq!(snapshot.cohort(&AgentId::new("B").unwrap()), 45);
        assert_eq!(snapshot.cohort(&AgentId::new("Z").unwrap()), 0);
    }

    #[test_case(40, 2, 2, 40 ; "one full clearance period")]
    #[test_case(40, 5, 2, 40 ; "longer than clearance")]
    #[test_case(40, 1, 2, 20 ; "half period")]
    #[test_case(45, 1, 4, 11 ; "rounds down")]
    fn moved_student_share(cohort: u32, magnitude: u32, clearance: u32, expected: u32) {
        assert_eq!(moved_students(cohort, magnitude, clearance), expected);
    }

    #[test]
    fn clearance_minutes_rounds_up_batches() {
        assert_eq!(clearance_minutes(0, 50, 2), 0);
        assert_eq!(clearance_minutes(50, 50, 2), 2);
        assert_eq!(clearance_minutes(51, 50, 2), 4);
        assert_eq!(clearance_minutes(135, 15, 2), 18);
    }

    #[test]
    fn clearance_minutes_saturates() {
        assert_eq!(clearance_minutes(u32::MAX, 1, 2), u32::MAX);
        let snapshot = CongestionSnapshot::from_total(u32::MAX - 5, &config(1));
        assert_eq!(snapshot.clearance_minutes(snapshot.arrivals), u32::MAX);
    }

    // ========================================================================
    // Staggered exits
    // ========================================================================

    #[test]
    fn batches_are_spaced_and_cover_cohort() {
        let batches = exit_batches(40, 4, 2);
        let offsets: Vec<u32> = batches.iter().map(|b| b.offset_mins).collect();
        let students: Vec<u32> = batches.iter().map(|b| b.students).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(students, vec![14, 13, 13]);
    }

    #[test_case(40, 4, 2, 26 ; "three batches")]
    #[test_case(40, 1, 2, 0 ; "span shorter than spacing")]
    #[test_case(3, 10, 2, 2 ; "one student per batch")]
    #[test_case(0, 6, 2, 0 ; "empty cohort")]
    fn staggered_share(cohort: u32, span: u32, spacing: u32, expected: u32) {
        assert_eq!(staggered_students(cohort, span, spacing), expected);
    }

    #[test]
    fn moved_by_follows_exit_kind() {
        let a = AgentId::new("A").unwrap();
        let snapshot =
            CongestionSnapshot::from_arrivals(BTreeMap::from([(a.clone(), 40)]), &config(50));
        let late = Adjustment::new(4, 10).unwrap();
        let spread = Adjustment::staggered(4, 10).unwrap();
        assert_eq!(snapshot.moved_by(&a, &late), 40);
        assert_eq!(snapshot.moved_by(&a, &spread), 26);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn batches_sum_to_cohort(cohort in 0u32..500, span in 0u32..30, spacing in 1u32..6) {
                let batches = exit_batches(cohort, span, spacing);
                prop_assert_eq!(batches.iter().map(|b| b.students).sum::<u32>(), cohort);
                let first = batches.first().map_or(0, |b| b.students);
                prop_assert_eq!(staggered_students(cohort, span, spacing), cohort - first);
            }
        }
    }
}
