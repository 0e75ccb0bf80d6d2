//! Per-pair critical sections.
//!
//! Every unordered pair of agents owns one mutex guarding the live
//! commitments the pair holds, one slot per round. An ACCEPT is registered
//! and enqueued while that mutex is held, so two acceptances for the same
//! pair and round can never both be in flight.

use std::collections::HashMap;
use std::sync::Arc;

use corridor_core::{AgentId, CommitmentId, CommitmentState, RoundId};
use parking_lot::Mutex;

use crate::error::{BrokerError, BrokerResult};

/// Unordered pair of agents; `PairKey::new(a, b) == PairKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    first: AgentId,
    second: AgentId,
}

impl PairKey {
    /// Builds the key for `a` and `b` in either order.
    #[must_use]
    pub fn new(a: &AgentId, b: &AgentId) -> Self {
        if a <= b {
            Self {
                first: a.clone(),
                second: b.clone(),
            }
        } else {
            Self {
                first: b.clone(),
                second: a.clone(),
            }
        }
    }

    /// Lower agent id.
    #[must_use]
    pub const fn first(&self) -> &AgentId {
        &self.first
    }

    /// Higher agent id.
    #[must_use]
    pub const fn second(&self) -> &AgentId {
        &self.second
    }
}

/// A commitment registered against a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveEntry {
    /// Commitment id.
    pub commitment_id: CommitmentId,
    /// `Proposed` until arbitration admits it, then `Accepted`.
    pub state: CommitmentState,
}

/// Live commitments of one pair, keyed by round.
#[derive(Debug, Default)]
pub struct PairSlots {
    live: HashMap<RoundId, LiveEntry>,
}

impl PairSlots {
    /// Registers a proposed commitment.
    ///
    /// Re-registering the same id is a no-op so a redelivered ACCEPT passes.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::PairConflict` if another commitment is live.
    pub fn reserve(&mut self, key: &PairKey, round: RoundId, id: CommitmentId) -> BrokerResult<()> {
        match self.live.get(&round) {
            Some(entry) if entry.commitment_id == id => Ok(()),
            Some(_) => Err(BrokerError::PairConflict {
                first: key.first.clone(),
                second: key.second.clone(),
                round,
            }),
            None => {
                self.live.insert(
                    round,
                    LiveEntry {
                        commitment_id: id,
                        state: CommitmentState::Proposed,
                    },
                );
                Ok(())
            }
        }
    }

    /// Marks a registered commitment as accepted.
    pub fn confirm(&mut self, round: RoundId, id: CommitmentId) {
        if let Some(entry) = self.live.get_mut(&round) {
            if entry.commitment_id == id {
                entry.state = CommitmentState::Accepted;
            }
        }
    }

    /// Drops a registered commitment; other ids are left alone.
    pub fn release(&mut self, round: RoundId, id: CommitmentId) -> bool {
        match self.live.get(&round) {
            Some(entry) if entry.commitment_id == id => {
                self.live.remove(&round);
                true
            }
            _ => false,
        }
    }

    /// Drops every still-proposed commitment of `round`.
    pub fn sweep_proposed(&mut self, round: RoundId) -> bool {
        match self.live.get(&round) {
            Some(entry) if entry.state == CommitmentState::Proposed => {
                self.live.remove(&round);
                true
            }
            _ => false,
        }
    }

    /// Drops whatever `round` holds, accepted or not.
    pub fn forget(&mut self, round: RoundId) -> bool {
        self.live.remove(&round).is_some()
    }

    /// Live entry for `round`.
    #[must_use]
    pub fn entry(&self, round: RoundId) -> Option<LiveEntry> {
        self.live.get(&round).copied()
    }

    /// Returns true if no round holds a commitment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Map of pair locks.
///
/// The outer map lock is held only to look up or create a pair's slot, never
/// while a pair lock is taken.
#[derive(Debug, Default)]
pub struct PairTable {
    pairs: Mutex<HashMap<PairKey, Arc<Mutex<PairSlots>>>>,
}

impl PairTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &PairKey) -> Arc<Mutex<PairSlots>> {
        let mut pairs = self.pairs.lock();
        Arc::clone(pairs.entry(key.clone()).or_default())
    }

    /// Runs `f` inside the critical section of the pair `(a, b)`.
    pub fn with_pair<R>(
        &self,
        a: &AgentId,
        b: &AgentId,
        f: impl FnOnce(&PairKey, &mut PairSlots) -> R,
    ) -> R {
        let key = PairKey::new(a, b);
        let slot = self.slot(&key);
        let mut slots = slot.lock();
        f(&key, &mut slots)
    }

    /// Drops every still-proposed commitment of `round`; returns how many.
    pub fn sweep_round(&self, round: RoundId) -> usize {
        let slots: Vec<_> = self.pairs.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.lock().sweep_proposed(round))
            .count()
    }

    /// Drops every entry of `round` regardless of state; returns how many.
    pub fn forget_round(&self, round: RoundId) -> usize {
        let slots: Vec<_> = self.pairs.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().forget(round)).count()
    }

    /// Removes pairs that hold nothing; returns how many pairs remain.
    ///
    /// A slot someone has already looked up is kept even when empty, so a
    /// caller about to enter its critical section never loses it.
    pub fn prune_idle(&self) -> usize {
        let mut pairs = self.pairs.lock();
        pairs.retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.lock().is_empty());
        pairs.len()
    }

    /// Number of pairs with a slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Returns true if no pair has a slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.lock().is_empty()
    }

    /// Live entry held by `(a, b)` in `round`.
    #[must_use]
    pub fn live_entry(&self, a: &AgentId, b: &AgentId, round: RoundId) -> Option<LiveEntry> {
        let key = PairKey::new(a, b);
        let slot = self.pairs.lock().get(&key).cloned()?;
        let entry = slot.lock().entry(round);
        entry
    }
}
