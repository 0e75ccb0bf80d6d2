//! Strike tracking for agents that fail to honor accepted commitments.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ids::AgentId;

/// Strikes recorded against one agent.
///
/// `total` never decreases. Reinstatement moves `baseline` up to `total`, so
/// the agent becomes eligible again while its history is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeRecord {
    /// Every strike ever recorded.
    pub total: u32,
    /// Value of `total` at the last reinstatement.
    pub baseline: u32,
}

impl StrikeRecord {
    /// Strikes counted against eligibility.
    #[must_use]
    pub const fn active(&self) -> u32 {
        self.total.saturating_sub(self.baseline)
    }
}

/// Strike counters for every agent, with a fixed violation limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounter {
    limit: u32,
    records: HashMap<AgentId, StrikeRecord>,
}

impl ViolationCounter {
    /// Creates a counter flagging agents at `limit` active strikes.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            records: HashMap::new(),
        }
    }

    /// The configured limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Records exactly one strike against `agent` and returns its record.
    pub fn record_violation(&mut self, agent: &AgentId) -> StrikeRecord {
        let record = self.records.entry(agent.clone()).or_default();
        record.total = record.total.saturating_add(1);
        let record = *record;
        if record.active() == self.limit {
            warn!(
                agent = %agent,
                strikes = record.active(),
                limit = self.limit,
                "agent reached violation limit, excluded from negotiation"
            );
        }
        record
    }

    /// Strike record for `agent`.
    #[must_use]
    pub fn record(&self, agent: &AgentId) -> StrikeRecord {
        self.records.get(agent).copied().unwrap_or_default()
    }

    /// Returns true while `agent` stays under the limit.
    #[must_use]
    pub fn is_eligible(&self, agent: &AgentId) -> bool {
        self.record(agent).active() < self.limit
    }

    /// External reset: clears active strikes, keeps the total.
    pub fn reinstate(&mut self, agent: &AgentId) -> StrikeRecord {
        let record = self.records.entry(agent.clone()).or_default();
        record.baseline = record.total;
        *record
    }

    /// Total strikes per agent, sorted.
    #[must_use]
    pub fn totals(&self) -> BTreeMap<AgentId, u32> {
        self.records
            .iter()
            .map(|(agent, record)| (agent.clone(), record.total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    #[test]
    fn new_agent_is_eligible() {
        let counter = ViolationCounter::new(3);
        assert!(counter.is_eligible(&agent("A")));
        assert_eq!(counter.record(&agent("A")).total, 0);
    }

    #[test]
    fn reaching_limit_flags_agent() {
        let mut counter = ViolationCounter::new(3);
        let a = agent("A");
        counter.record_violation(&a);
        counter.record_violation(&a);
        assert!(counter.is_eligible(&a));
        counter.record_violation(&a);
        assert!(!counter.is_eligible(&a));
        assert_eq!(counter.record(&a).active(), 3);
    }

    #[test]
    fn reinstatement_keeps_total() {
        let mut counter = ViolationCounter::new(1);
        let a = agent("A");
        counter.record_violation(&a);
        assert!(!counter.is_eligible(&a));

        let record = counter.reinstate(&a);
        assert_eq!(record.total, 1);
        assert_eq!(record.active(), 0);
        assert!(counter.is_eligible(&a));
    }

    #[test]
    fn totals_are_sorted() {
        let mut counter = ViolationCounter::new(3);
        counter.record_violation(&agent("C"));
        counter.record_violation(&agent("A"));
        let totals: Vec<_> = counter.totals().into_keys().collect();
        assert_eq!(totals, vec![agent("A"), agent("C")]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn total_is_monotonic(ops in proptest::collection::vec(any::<bool>(), 0..60)) {
                let mut counter = ViolationCounter::new(3);
                let a = agent("A");
                let mut previous = 0;
                for violate in ops {
                    let record = if violate {
                        let record = counter.record_violation(&a);
                        prop_assert_eq!(record.total, previous + 1);
                        record
                    } else {
                        counter.reinstate(&a)
                    };
                    prop_assert!(record.total >= previous);
                    previous = record.total;
                }
            }
        }
    }
}
