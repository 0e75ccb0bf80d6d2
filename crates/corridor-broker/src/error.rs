//! Error types for the message broker.

use corridor_core::{AgentId, RoundId};
use thiserror::Error;

/// Errors that can occur when publishing or subscribing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Addressed agent has no mailbox.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(AgentId),

    /// Agent already holds a live mailbox.
    #[error("agent {0} is already subscribed")]
    AlreadySubscribed(AgentId),

    /// The pair already holds a live commitment in this round.
    #[error("pair ({first}, {second}) already holds a live commitment in round {round}")]
    PairConflict {
        /// Lower agent id of the pair.
        first: AgentId,
        /// Higher agent id of the pair.
        second: AgentId,
        /// Round of the conflicting commitment.
        round: RoundId,
    },

    /// Round was cancelled; no further acceptances are taken.
    #[error("round {0} was cancelled")]
    RoundCancelled(RoundId),

    /// Round was closed; no further acceptances are taken.
    #[error("round {0} is closed")]
    RoundClosed(RoundId),

    /// Round was never opened on this broker.
    #[error("round {0} is unknown")]
    UnknownRound(RoundId),

    /// An acceptance was published outside of any round.
    #[error("ACCEPT must carry a round id")]
    MissingRound,

    /// Broker was shut down.
    #[error("broker is shut down")]
    Closed,
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
