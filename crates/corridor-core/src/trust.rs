//! Per counter-party trust scores.
//!
//! Trust only moves when a commitment resolves: a fulfilled commitment adds
//! [`TrustScore::FULFILLED_REWARD`] (capped at [`TrustScore::CEILING`]), a
//! violated one subtracts [`TrustScore::VIOLATION_PENALTY`] (floored at
//! [`TrustScore::FLOOR`]).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// A trust score in `[FLOOR, CEILING]`.
///
/// - 0.0 = no trust left
/// - 0.5 = neutral (unknown counter-party)
/// - 1.0 = full trust
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TrustScore(f64);

impl TrustScore {
    /// Lower bound.
    pub const FLOOR: f64 = 0.0;
    /// Upper bound.
    pub const CEILING: f64 = 1.0;
    /// Starting score for unknown counter-parties.
    pub const NEUTRAL: Self = Self(0.5);
    /// Added when a commitment is fulfilled.
    pub const FULFILLED_REWARD: f64 = 0.1;
    /// Subtracted when a commitment is violated.
    pub const VIOLATION_PENALTY: f64 = 0.2;
    /// Trust at or above which an owed agent still concedes.
    pub const HIGH: f64 = 0.7;

    /// Creates a score, clamping into `[FLOOR, CEILING]`.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::NEUTRAL;
        }
        Self(value.clamp(Self::FLOOR, Self::CEILING))
    }

    /// Returns the raw score value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Score after a fulfilled commitment.
    #[must_use]
    pub fn rewarded(self) -> Self {
        Self::clamped(self.0 + Self::FULFILLED_REWARD)
    }

    /// Score after a violated commitment.
    #[must_use]
    pub fn penalized(self) -> Self {
        Self::clamped(self.0 - Self::VIOLATION_PENALTY)
    }

    /// Returns true at or above [`TrustScore::HIGH`].
    #[must_use]
    pub fn is_high(self) -> bool {
        self.0 >= Self::HIGH
    }
}

impl Default for TrustScore {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Trust this agent places in each counter-party.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustTable {
    scores: HashMap<AgentId, TrustScore>,
}

impl TrustTable {
    /// Creates an empty table; every counter-party starts neutral.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust in `peer`.
    #[must_use]
    pub fn get(&self, peer: &AgentId) -> TrustScore {
        self.scores.get(peer).copied().unwrap_or_default()
    }

    /// Seeds trust in `peer` (scenario setup, reinstatement).
    pub fn set(&mut self, peer: AgentId, value: f64) {
        self.scores.insert(peer, TrustScore::clamped(value));
    }

    /// Applies the fulfilled reward and returns the new score.
    pub fn record_fulfilled(&mut self, peer: &AgentId) -> TrustScore {
        let score = self.scores.entry(peer.clone()).or_default();
        *score = score.rewarded();
        *score
    }

    /// Applies the violation penalty and returns the new score.
    pub fn record_violated(&mut self, peer: &AgentId) -> TrustScore {
        let score = self.scores.entry(peer.clone()).or_default();
        *score = score.penalized();
        *score
    }

    /// Sorted copy of every known score.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<AgentId, f64> {
        self.scores
            .iter()
            .map(|(peer, score)| (peer.clone(), score.value()))
            .collect()
    }
}
