//! The agent capability shared by classrooms and the bottleneck.

use corridor_broker::{Envelope, MessageBroker, MessageKind};
use corridor_core::{
    AgentId, AgentRole, Commitment, CommitmentState, ObligationLedger, TransitionLog, TrustTable,
};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::AgentResult;

/// Message kinds a classroom handles.
pub const CLASSROOM_KINDS: &[MessageKind] = &[
    MessageKind::NegotiationRequest,
    MessageKind::Offer,
    MessageKind::CounterOffer,
    MessageKind::Accept,
    MessageKind::Reject,
    MessageKind::CommitmentConfirm,
    MessageKind::ViolationNotice,
    MessageKind::IntervalTick,
];

/// Message kinds the bottleneck handles.
pub const BOTTLENECK_KINDS: &[MessageKind] = &[
    MessageKind::Accept,
    MessageKind::Reject,
    MessageKind::IntervalReport,
];

/// Out-of-band commands from the episode driver.
#[derive(Debug)]
pub enum AgentControl {
    /// Creditor side of a forgiveness; replies with the credits forgiven.
    Forgive {
        /// Agent whose debt is dropped.
        debtor: AgentId,
        /// Upper bound on credits forgiven.
        credits: u32,
        /// Receives the credits actually forgiven.
        reply: oneshot::Sender<u32>,
    },
    /// Debtor side of a forgiveness; replies with the credits cleared.
    ForgivenBy {
        /// Agent that forgave.
        creditor: AgentId,
        /// Credits the creditor forgave.
        credits: u32,
        /// Receives the credits actually cleared.
        reply: oneshot::Sender<u32>,
    },
    /// New expected attendance; reported to the coordinator of a live round.
    ReviseAttendance {
        /// Students expected this interval.
        attendance: u32,
    },
}

/// Common contract of every agent variant.
///
/// `handle` runs to completion without awaiting, so no agent ever holds
/// state across a suspension point while processing a message.
pub trait Agent: Send {
    /// Shared agent state.
    fn core(&self) -> &AgentCore;

    /// Mutable shared agent state.
    fn core_mut(&mut self) -> &mut AgentCore;

    /// Message kinds this variant processes.
    fn handled_kinds(&self) -> &'static [MessageKind];

    /// Processes one delivered message.
    ///
    /// # Errors
    ///
    /// Returns the round-local error; the caller logs it and continues.
    fn handle(&mut self, envelope: &Envelope, broker: &MessageBroker) -> AgentResult<()>;

    /// Agent id.
    fn id(&self) -> &AgentId {
        self.core().id()
    }

    /// Agent role.
    fn role(&self) -> AgentRole {
        self.core().role()
    }

    /// Returns true if `kind` is in the handler table.
    fn handles(&self, kind: MessageKind) -> bool {
        self.handled_kinds().contains(&kind)
    }

    /// When the agent's pending wait expires, if it is waiting.
    fn deadline(&self) -> Option<Instant> {
        None
    }

    /// Called once the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns the round-local error; the caller logs it and continues.
    fn on_timeout(&mut self, _broker: &MessageBroker) -> AgentResult<()> {
        Ok(())
    }

    /// Applies a driver command.
    fn control(&mut self, command: AgentControl, _broker: &MessageBroker) {
        debug!(agent = %self.id(), ?command, "control command ignored");
    }
}

/// Identity, trust table, obligation ledger and applied-transition log.
#[derive(Debug, Clone)]
pub struct AgentCore {
    id: AgentId,
    role: AgentRole,
    trust: TrustTable,
    ledger: ObligationLedger,
    applied: TransitionLog,
}

impl AgentCore {
    /// Fresh state: every counter-party neutral, nothing owed.
    #[must_use]
    pub fn new(id: AgentId, role: AgentRole) -> Self {
        Self {
            id,
            role,
            trust: TrustTable::new(),
            ledger: ObligationLedger::new(),
            applied: TransitionLog::new(),
        }
    }

    /// Agent id.
    #[must_use]
    pub const fn id(&self) -> &AgentId {
        &self.id
    }

    /// Agent role.
    #[must_use]
    pub const fn role(&self) -> AgentRole {
        self.role
    }

    /// Trust this agent places in others.
    #[must_use]
    pub const fn trust(&self) -> &TrustTable {
        &self.trust
    }

    /// Mutable trust table, for scenario seeding.
    pub fn trust_mut(&mut self) -> &mut TrustTable {
        &mut self.trust
    }

    /// Obligation balances.
    #[must_use]
    pub const fn ledger(&self) -> &ObligationLedger {
        &self.ledger
    }

    /// Mutable obligation ledger, for forgiveness.
    pub fn ledger_mut(&mut self) -> &mut ObligationLedger {
        &mut self.ledger
    }

    /// Transitions applied so far.
    #[must_use]
    pub const fn applied(&self) -> &TransitionLog {
        &self.applied
    }

    /// Applies a confirmed commitment transition from this agent's side.
    ///
    /// - `Accepted`: the proposer is owed the credits, the acceptor owes them.
    /// - `Fulfilled` / `Violated`: everyone except the proposer adjusts trust
    ///   in the proposer; on violation both parties reverse the credits.
    ///
    /// Keyed by (commitment id, state): a redelivery returns false and
    /// changes nothing.
    pub fn apply_transition(&mut self, commitment: &Commitment) -> bool {
        if !self.applied.first_application(commitment.id, commitment.state) {
            trace!(
                agent = %self.id,
                commitment = %commitment.id,
                state = %commitment.state,
                "transition already applied"
            );
            return false;
        }

        let credits = commitment.credits();
        let is_proposer = commitment.proposer == self.id;
        let is_acceptor = commitment.acceptor == self.id;

        match commitment.state {
            CommitmentState::Accepted => {
                if is_proposer {
                    self.ledger.record_granted(&commitment.acceptor, credits);
                } else if is_acceptor {
                    self.ledger.record_received(&commitment.proposer, credits);
                }
            }
            CommitmentState::Fulfilled => {
                if !is_proposer {
                    self.trust.record_fulfilled(&commitment.proposer);
                }
            }
            CommitmentState::Violated => {
                if !is_proposer {
                    self.trust.record_violated(&commitment.proposer);
                }
                if self.applied.contains(commitment.id, CommitmentState::Accepted) {
                    if is_proposer {
                        self.ledger.record_received(&commitment.acceptor, credits);
                    } else if is_acceptor {
                        self.ledger.record_granted(&commitment.proposer, credits);
                    }
                }
            }
            CommitmentState::Proposed | CommitmentState::Rejected => {}
        }

        debug!(
            agent = %self.id,
            commitment = %commitment.id,
            state = %commitment.state,
            proposer = %commitment.proposer,
            acceptor = %commitment.acceptor,
            "transition applied"
        );
        true
    }
}
