//! Obligation credits owed between agents.
//!
//! Each agent keeps its own ledger. A balance is positive when the
//! counter-party owes this agent and negative when this agent owes the
//! counter-party. Both sides apply the same confirmed transition, so for any
//! pair `a.balance(b) + b.balance(a) == 0` holds at all times.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Signed obligation balances keyed by counter-party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationLedger {
    balances: HashMap<AgentId, i64>,
}

impl ObligationLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance with `peer` (positive: `peer` owes us).
    #[must_use]
    pub fn balance(&self, peer: &AgentId) -> i64 {
        self.balances.get(peer).copied().unwrap_or(0)
    }

    /// Credits this agent owes `peer` (zero when `peer` owes us).
    #[must_use]
    pub fn owed_to(&self, peer: &AgentId) -> u64 {
        let balance = self.balance(peer);
        if balance < 0 { balance.unsigned_abs() } else { 0 }
    }

    /// We granted `peer` a favor worth `credits`.
    pub fn record_granted(&mut self, peer: &AgentId, credits: u32) {
        self.shift(peer, i64::from(credits));
    }

    /// `peer` granted us a favor worth `credits`.
    pub fn record_received(&mut self, peer: &AgentId, credits: u32) {
        self.shift(peer, -i64::from(credits));
    }

    /// Creditor side of a forgiveness: drops up to `credits` of `peer`'s debt.
    ///
    /// Returns the credits actually forgiven.
    pub fn forgive(&mut self, peer: &AgentId, credits: u32) -> u32 {
        let balance = self.balance(peer);
        if balance <= 0 {
            return 0;
        }
        let forgiven = balance.min(i64::from(credits));
        self.shift(peer, -forgiven);
        forgiven as u32
    }

    /// Debtor side of a forgiveness: drops up to `credits` of our debt to `peer`.
    ///
    /// Returns the credits actually cleared.
    pub fn forgiven_by(&mut self, peer: &AgentId, credits: u32) -> u32 {
        let owed = self.owed_to(peer);
        let cleared = owed.min(u64::from(credits));
        self.shift(peer, cleared as i64);
        cleared as u32
    }

    /// Sum of every balance.
    #[must_use]
    pub fn net(&self) -> i64 {
        self.balances.values().sum()
    }

    /// Sorted copy of every non-zero balance.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<AgentId, i64> {
        self.balances
            .iter()
            .filter(|(_, balance)| **balance != 0)
            .map(|(peer, balance)| (peer.clone(), *balance))
            .collect()
    }

    fn shift(&mut self, peer: &AgentId, delta: i64) {
        let entry = self.balances.entry(peer.clone()).or_insert(0);
        *entry = entry.saturating_add(delta);
    }
}
