//! Commitments and their lifecycle.
//!
//! ```text
//! Proposed ──► Accepted ──► Fulfilled
//!    │             └──────► Violated
//!    └──────► Rejected
//! ```
//!
//! Each arrow is taken at most once per commitment.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{AgentId, CommitmentId, RoundId};

/// Direction a classroom moves its release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    /// Release students before the scheduled end.
    #[default]
    Earlier,
    /// Hold students past the scheduled end.
    Later,
}

impl ShiftDirection {
    /// Sign applied to a magnitude.
    #[must_use]
    pub const fn sign(self) -> i32 {
        match self {
            Self::Earlier => -1,
            Self::Later => 1,
        }
    }
}

/// How a classroom releases its cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// The whole cohort leaves before the scheduled end.
    #[default]
    Early,
    /// The whole cohort is held past the scheduled end.
    Late,
    /// The cohort leaves in batches spread over the shift's span.
    Staggered,
}

impl ExitKind {
    /// Shoulder the moved students land in.
    #[must_use]
    pub const fn direction(self) -> ShiftDirection {
        match self {
            Self::Early => ShiftDirection::Earlier,
            Self::Late | Self::Staggered => ShiftDirection::Later,
        }
    }

    /// Plain kind for a direction.
    #[must_use]
    pub const fn plain(direction: ShiftDirection) -> Self {
        match direction {
            ShiftDirection::Earlier => Self::Early,
            ShiftDirection::Later => Self::Late,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Late => "late",
            Self::Staggered => "staggered",
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signed, non-zero schedule shift bounded by the configured maximum.
///
/// For a staggered exit the minutes are the span the batches cover. A
/// repayment shift settles what the proposer owes and asks for nothing
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Adjustment {
    minutes: i32,
    kind: ExitKind,
    repayment: bool,
}

impl Adjustment {
    /// Creates a plain early (negative) or late (positive) adjustment.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ZeroAdjustment` for zero and
    /// `CoreError::AdjustmentOutOfBounds` when `|minutes| > max`.
    pub fn new(minutes: i32, max: u32) -> CoreResult<Self> {
        let kind = if minutes < 0 { ExitKind::Early } else { ExitKind::Late };
        Self::build(minutes, kind, max)
    }

    /// Creates an adjustment from a magnitude and a direction.
    ///
    /// # Errors
    ///
    /// Same as [`Adjustment::new`].
    pub fn toward(direction: ShiftDirection, magnitude: u32, max: u32) -> CoreResult<Self> {
        Self::of_kind(ExitKind::plain(direction), magnitude, max)
    }

    /// Creates a staggered exit whose batches span `span` minutes.
    ///
    /// # Errors
    ///
    /// Same as [`Adjustment::new`].
    pub fn staggered(span: u32, max: u32) -> CoreResult<Self> {
        Self::of_kind(ExitKind::Staggered, span, max)
    }

    /// Creates an adjustment of `kind` moving by `magnitude` minutes.
    ///
    /// # Errors
    ///
    /// Same as [`Adjustment::new`].
    pub fn of_kind(kind: ExitKind, magnitude: u32, max: u32) -> CoreResult<Self> {
        let magnitude = i32::try_from(magnitude).map_err(|_| CoreError::AdjustmentOutOfBounds {
            minutes: i32::MAX,
            max,
        })?;
        Self::build(kind.direction().sign() * magnitude, kind, max)
    }

    fn build(minutes: i32, kind: ExitKind, max: u32) -> CoreResult<Self> {
        let adjustment = Self {
            minutes,
            kind,
            repayment: false,
        };
        adjustment.check(max)?;
        Ok(adjustment)
    }

    /// Marks the shift as settling the proposer's debt.
    #[must_use]
    pub const fn as_repayment(mut self, repayment: bool) -> Self {
        self.repayment = repayment;
        self
    }

    /// Re-checks the bounds and the sign of the kind (values arriving over
    /// the wire are not trusted).
    ///
    /// # Errors
    ///
    /// Same as [`Adjustment::new`], plus `CoreError::ExitKindMismatch` when
    /// the sign disagrees with the kind.
    pub fn check(&self, max: u32) -> CoreResult<()> {
        if self.minutes == 0 {
            return Err(CoreError::ZeroAdjustment);
        }
        if self.minutes.unsigned_abs() > max {
            return Err(CoreError::AdjustmentOutOfBounds {
                minutes: self.minutes,
                max,
            });
        }
        if self.minutes.signum() != self.kind.direction().sign() {
            return Err(CoreError::ExitKindMismatch {
                kind: self.kind.name(),
                minutes: self.minutes,
            });
        }
        Ok(())
    }

    /// Signed minutes.
    #[must_use]
    pub const fn minutes(&self) -> i32 {
        self.minutes
    }

    /// Absolute minutes.
    #[must_use]
    pub const fn magnitude(&self) -> u32 {
        self.minutes.unsigned_abs()
    }

    /// Direction of the shift.
    #[must_use]
    pub const fn direction(&self) -> ShiftDirection {
        if self.minutes < 0 {
            ShiftDirection::Earlier
        } else {
            ShiftDirection::Later
        }
    }

    /// How the cohort is released.
    #[must_use]
    pub const fn kind(&self) -> ExitKind {
        self.kind
    }

    /// Returns true if the shift settles the proposer's debt.
    #[must_use]
    pub const fn is_repayment(&self) -> bool {
        self.repayment
    }

    /// Rank the acceptor gives the shift: staggered exits 3, repayments 2,
    /// favors expecting one back 1.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match (self.kind, self.repayment) {
            (ExitKind::Staggered, _) => 3,
            (_, true) => 2,
            (_, false) => 1,
        }
    }

    /// Same kind, different magnitude.
    ///
    /// # Errors
    ///
    /// Same as [`Adjustment::new`].
    pub fn with_magnitude(&self, magnitude: u32, max: u32) -> CoreResult<Self> {
        Ok(Self::of_kind(self.kind, magnitude, max)?.as_repayment(self.repayment))
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExitKind::Staggered => write!(f, "{:+}min staggered", self.minutes),
            ExitKind::Early | ExitKind::Late => write!(f, "{:+}min", self.minutes),
        }
    }
}

/// State of a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentState {
    /// Both classrooms agreed; awaiting arbitration.
    Proposed,
    /// Confirmed by the bottleneck; governs the current interval.
    Accepted,
    /// Refused by arbitration or cancelled.
    Rejected,
    /// The shift was honored.
    Fulfilled,
    /// The shift was not honored.
    Violated,
}

impl CommitmentState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use CommitmentState::{Accepted, Fulfilled, Proposed, Rejected, Violated};

        matches!(
            (self, target),
            (Proposed, Accepted | Rejected) | (Accepted, Fulfilled | Violated)
        )
    }

    /// Returns true while the commitment still holds its pair slot.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Proposed | Self::Accepted)
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Fulfilled | Self::Violated)
    }
}

impl fmt::Display for CommitmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Violated => write!(f, "violated"),
        }
    }
}

/// A bilateral schedule adjustment: `proposer` shifts its release by
/// `adjustment` in favor of `acceptor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    /// Unique id, also the idempotency key for ledger updates.
    pub id: CommitmentId,
    /// Round that produced the commitment.
    pub round: RoundId,
    /// Interval the commitment governs.
    pub interval: u64,
    /// Classroom that shifts.
    pub proposer: AgentId,
    /// Classroom that receives the favor.
    pub acceptor: AgentId,
    /// Signed shift in minutes.
    pub adjustment: Adjustment,
    /// Lifecycle state.
    pub state: CommitmentState,
    /// When the commitment was created.
    pub created_at: DateTime<Utc>,
}

impl Commitment {
    /// Creates a commitment in the `Proposed` state.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SelfCommitment` if both parties are the same agent.
    pub fn propose(
        id: CommitmentId,
        round: RoundId,
        interval: u64,
        proposer: AgentId,
        acceptor: AgentId,
        adjustment: Adjustment,
    ) -> CoreResult<Self> {
        if proposer == acceptor {
            return Err(CoreError::SelfCommitment(proposer.to_string()));
        }
        Ok(Self {
            id,
            round,
            interval,
            proposer,
            acceptor,
            adjustment,
            state: CommitmentState::Proposed,
            created_at: Utc::now(),
        })
    }

    /// Obligation credits the acceptor incurs towards the proposer.
    #[must_use]
    pub const fn credits(&self) -> u32 {
        self.adjustment.magnitude()
    }

    /// Returns true if `agent` is one of the two parties.
    #[must_use]
    pub fn involves(&self, agent: &AgentId) -> bool {
        &self.proposer == agent || &self.acceptor == agent
    }

    /// The other party, if `agent` is a party.
    #[must_use]
    pub fn counterparty(&self, agent: &AgentId) -> Option<&AgentId> {
        if &self.proposer == agent {
            Some(&self.acceptor)
        } else if &self.acceptor == agent {
            Some(&self.proposer)
        } else {
            None
        }
    }

    fn transition_to(&mut self, target: CommitmentState) -> CoreResult<()> {
        if self.state.can_transition_to(&target) {
            self.state = target;
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Arbitration admitted the commitment.
    pub fn accept(&mut self) -> CoreResult<()> {
        self.transition_to(CommitmentState::Accepted)
    }

    /// Arbitration refused the commitment.
    pub fn reject(&mut self) -> CoreResult<()> {
        self.transition_to(CommitmentState::Rejected)
    }

    /// The shift was honored.
    pub fn fulfill(&mut self) -> CoreResult<()> {
        self.transition_to(CommitmentState::Fulfilled)
    }

    /// The shift was not honored.
    pub fn violate(&mut self) -> CoreResult<()> {
        self.transition_to(CommitmentState::Violated)
    }
}

/// Remembers which (commitment, state) transitions an agent already applied,
/// so redelivered confirmations are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionLog {
    applied: HashSet<(CommitmentId, CommitmentState)>,
}

impl TransitionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the transition; returns false if it was already applied.
    pub fn first_application(&mut self, id: CommitmentId, state: CommitmentState) -> bool {
        self.applied.insert((id, state))
    }

    /// Returns true if the transition was applied before.
    #[must_use]
    pub fn contains(&self, id: CommitmentId, state: CommitmentState) -> bool {
        self.applied.contains(&(id, state))
    }

    /// Number of applied transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Returns true if nothing was applied yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}
