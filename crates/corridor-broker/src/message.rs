//! Negotiation message types.
//!
//! The set of messages is closed: every payload is a variant of [`Payload`],
//! and [`MessageKind`] is derived from it, so agents dispatch on a tag rather
//! than on runtime type inspection.

use std::fmt;

use chrono::{DateTime, Utc};
use corridor_core::{
    Adjustment, AgentId, Commitment, CommitmentId, CongestionSnapshot, CoreResult, RoundId,
    StrikeRecord,
};
use serde::{Deserialize, Serialize};

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Bottleneck opens a round.
    NegotiationRequest,
    /// Classroom proposes to shift in favor of a peer.
    Offer,
    /// Acceptor asks for a smaller shift.
    CounterOffer,
    /// Both classrooms agree; sent to the round coordinator.
    Accept,
    /// A thread of the round closes without agreement, or arbitration refused.
    Reject,
    /// A commitment transition (accepted or fulfilled) confirmed by the bottleneck.
    CommitmentConfirm,
    /// A commitment was not honored, or strikes changed.
    ViolationNotice,
    /// Start of an interval; classrooms answer with a report.
    IntervalTick,
    /// Classroom's expected arrivals and executed shifts.
    IntervalReport,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NegotiationRequest => "NEGOTIATION_REQUEST",
            Self::Offer => "OFFER",
            Self::CounterOffer => "COUNTER_OFFER",
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::CommitmentConfirm => "COMMITMENT_CONFIRM",
            Self::ViolationNotice => "VIOLATION_NOTICE",
            Self::IntervalTick => "INTERVAL_TICK",
            Self::IntervalReport => "INTERVAL_REPORT",
        };
        f.write_str(name)
    }
}

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A single registered agent.
    Agent(AgentId),
    /// Every subscribed agent except the sender.
    Broadcast,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Broadcast => write!(f, "BROADCAST"),
        }
    }
}

/// Body of a negotiation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    /// Interval under negotiation.
    pub interval: u64,
    /// Congestion observed by the bottleneck.
    pub snapshot: CongestionSnapshot,
    /// Classrooms allowed to take part in this round.
    pub eligible: Vec<AgentId>,
}

impl NegotiationRequest {
    /// Returns true if `agent` may take part.
    #[must_use]
    pub fn is_eligible(&self, agent: &AgentId) -> bool {
        self.eligible.contains(agent)
    }
}

/// A proposed shift: `proposer` moves by `adjustment` in favor of `acceptor`.
///
/// Carried by OFFER, COUNTER_OFFER and ACCEPT. The `commitment_id` is fixed by
/// the proposer when the offer is made and kept through the counter round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Id the commitment will carry once created.
    pub commitment_id: CommitmentId,
    /// Agent running the round (receives ACCEPT and thread-closing REJECT).
    pub coordinator: AgentId,
    /// Interval the shift governs.
    pub interval: u64,
    /// Classroom that shifts.
    pub proposer: AgentId,
    /// Classroom that receives the favor.
    pub acceptor: AgentId,
    /// Signed shift.
    pub adjustment: Adjustment,
}

impl Proposal {
    /// Same proposal, different adjustment.
    #[must_use]
    pub fn with_adjustment(&self, adjustment: Adjustment) -> Self {
        Self {
            adjustment,
            ..self.clone()
        }
    }

    /// Builds the `Proposed` commitment this proposal describes.
    ///
    /// # Errors
    ///
    /// Fails if both parties are the same agent.
    pub fn to_commitment(&self, round: RoundId) -> CoreResult<Commitment> {
        Commitment::propose(
            self.commitment_id,
            round,
            self.interval,
            self.proposer.clone(),
            self.acceptor.clone(),
            self.adjustment,
        )
    }
}

/// Why a thread or a commitment was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Classroom chose not to offer this round.
    Declined,
    /// Classroom is flagged or not on the eligible list.
    Ineligible,
    /// Acceptor refused the offer.
    Refused,
    /// Proposer refused the counter-offer.
    CounterRefused,
    /// The pair already holds a live commitment for the round.
    PairConflict,
    /// A reply did not arrive within the round timeout.
    Timeout,
    /// The bottleneck cancelled the round.
    Cancelled,
    /// Admitting the shift would overbook the shoulder window.
    WouldOverbook,
    /// Congestion was already cleared by higher-ranked commitments.
    Surplus,
    /// Round resolution was aborted by the capacity check.
    Aborted,
    /// Proposal failed validation.
    Invalid,
    /// The counter-party is not registered.
    Unreachable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Declined => "declined",
            Self::Ineligible => "ineligible",
            Self::Refused => "refused",
            Self::CounterRefused => "counter_refused",
            Self::PairConflict => "pair_conflict",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::WouldOverbook => "would_overbook",
            Self::Surplus => "surplus",
            Self::Aborted => "aborted",
            Self::Invalid => "invalid",
            Self::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// Body of a REJECT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// The rejected proposal; `None` when a classroom declines to offer.
    pub proposal: Option<Proposal>,
    /// Why.
    pub reason: RejectReason,
}

impl Rejection {
    /// A classroom declining the round.
    #[must_use]
    pub const fn declined(reason: RejectReason) -> Self {
        Self {
            proposal: None,
            reason,
        }
    }

    /// A rejected proposal.
    #[must_use]
    pub const fn of(proposal: Proposal, reason: RejectReason) -> Self {
        Self {
            proposal: Some(proposal),
            reason,
        }
    }
}

/// Body of a VIOLATION_NOTICE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationNotice {
    /// Agent the strikes are counted against.
    pub offender: AgentId,
    /// The violated commitment; `None` for a reinstatement notice.
    pub commitment: Option<Commitment>,
    /// Strike record after this notice.
    pub strikes: StrikeRecord,
    /// Configured violation limit.
    pub limit: u32,
}

/// A shift a classroom actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedShift {
    /// Commitment the shift belongs to.
    pub commitment_id: CommitmentId,
    /// Minutes actually applied (0 when not honored).
    pub applied_minutes: i32,
}

/// Body of an INTERVAL_REPORT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalReport {
    /// Interval the report is for.
    pub interval: u64,
    /// Students this classroom expects to release.
    pub expected_arrivals: u32,
    /// Shifts executed for the previous interval's commitments.
    pub executed: Vec<ExecutedShift>,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// See [`MessageKind::NegotiationRequest`].
    NegotiationRequest(NegotiationRequest),
    /// See [`MessageKind::Offer`].
    Offer(Proposal),
    /// See [`MessageKind::CounterOffer`].
    CounterOffer(Proposal),
    /// See [`MessageKind::Accept`].
    Accept(Proposal),
    /// See [`MessageKind::Reject`].
    Reject(Rejection),
    /// See [`MessageKind::CommitmentConfirm`].
    CommitmentConfirm(Commitment),
    /// See [`MessageKind::ViolationNotice`].
    ViolationNotice(ViolationNotice),
    /// See [`MessageKind::IntervalTick`].
    IntervalTick {
        /// Interval that starts.
        interval: u64,
    },
    /// See [`MessageKind::IntervalReport`].
    IntervalReport(IntervalReport),
}

impl Payload {
    /// The tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::NegotiationRequest(_) => MessageKind::NegotiationRequest,
            Self::Offer(_) => MessageKind::Offer,
            Self::CounterOffer(_) => MessageKind::CounterOffer,
            Self::Accept(_) => MessageKind::Accept,
            Self::Reject(_) => MessageKind::Reject,
            Self::CommitmentConfirm(_) => MessageKind::CommitmentConfirm,
            Self::ViolationNotice(_) => MessageKind::ViolationNotice,
            Self::IntervalTick { .. } => MessageKind::IntervalTick,
            Self::IntervalReport(_) => MessageKind::IntervalReport,
        }
    }
}

/// A message before the broker stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending agent.
    pub sender: AgentId,
    /// Destination.
    pub recipient: Recipient,
    /// Round correlation id, when the message belongs to a round.
    pub round: Option<RoundId>,
    /// Body.
    pub payload: Payload,
}

impl Message {
    /// Message to a single agent.
    #[must_use]
    pub const fn to(
        sender: AgentId,
        recipient: AgentId,
        round: Option<RoundId>,
        payload: Payload,
    ) -> Self {
        Self {
            sender,
            recipient: Recipient::Agent(recipient),
            round,
            payload,
        }
    }

    /// Message to every subscriber except the sender.
    #[must_use]
    pub const fn broadcast(sender: AgentId, round: Option<RoundId>, payload: Payload) -> Self {
        Self {
            sender,
            recipient: Recipient::Broadcast,
            round,
            payload,
        }
    }

    /// The tag of the payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// A delivered message, stamped by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Global publish sequence; delivery order at every recipient follows it.
    pub seq: u64,
    /// When the broker accepted the message.
    pub published_at: DateTime<Utc>,
    /// The message itself.
    pub message: Message,
}

impl Envelope {
    /// The tag of the payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Sending agent.
    #[must_use]
    pub const fn sender(&self) -> &AgentId {
        &self.message.sender
    }

    /// Round correlation id.
    #[must_use]
    pub const fn round(&self) -> Option<RoundId> {
        self.message.round
    }

    /// Body.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.message.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_core::NegotiationConfig;

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn proposal() -> Proposal {
        Proposal {
            commitment_id: CommitmentId::new(),
            coordinator: agent("Bottleneck"),
            interval: 3,
            proposer: agent("A"),
            acceptor: agent("B"),
            adjustment: Adjustment::new(-4, 10).unwrap(),
        }
    }

    #[test]
    fn payload_kind_tags() {
        let p = proposal();
        assert_eq!(Payload::Offer(p.clone()).kind(), MessageKind::Offer);
        assert_eq!(Payload::CounterOffer(p.clone()).kind(), MessageKind::CounterOffer);
        assert_eq!(Payload::Accept(p).kind(), MessageKind::Accept);
        assert_eq!(Payload::IntervalTick { interval: 1 }.kind(), MessageKind::IntervalTick);
    }

    #[test]
    fn kind_display_matches_wire_names() {
        assert_eq!(MessageKind::NegotiationRequest.to_string(), "NEGOTIATION_REQUEST");
        assert_eq!(MessageKind::CommitmentConfirm.to_string(), "COMMITMENT_CONFIRM");
        let json = serde_json::to_string(&MessageKind::CounterOffer).unwrap();
        assert_eq!(json, "\"COUNTER_OFFER\"");
    }

    #[test]
    fn proposal_to_commitment_is_proposed() {
        let p = proposal();
        let round = RoundId::new();
        let c = p.to_commitment(round).unwrap();
        assert_eq!(c.id, p.commitment_id);
        assert_eq!(c.round, round);
        assert_eq!(c.state, corridor_core::CommitmentState::Proposed);
        assert_eq!(c.credits(), 4);
    }

    #[test]
    fn proposal_with_adjustment_keeps_id() {
        let p = proposal();
        let smaller = p.with_adjustment(Adjustment::new(-2, 10).unwrap());
        assert_eq!(smaller.commitment_id, p.commitment_id);
        assert_eq!(smaller.adjustment.minutes(), -2);
    }

    #[test]
    fn request_eligibility() {
        let config = NegotiationConfig::default();
        let request = NegotiationRequest {
            interval: 1,
            snapshot: CongestionSnapshot::from_total(80, &config),
            eligible: vec![agent("A")],
        };
        assert!(request.is_eligible(&agent("A")));
        assert!(!request.is_eligible(&agent("B")));
    }

    #[test]
    fn broadcast_recipient_display() {
        let msg =
            Message::broadcast(agent("Bottleneck"), None, Payload::IntervalTick { interval: 1 });
        assert_eq!(msg.recipient.to_string(), "BROADCAST");
        assert_eq!(msg.kind(), MessageKind::IntervalTick);
    }
}
