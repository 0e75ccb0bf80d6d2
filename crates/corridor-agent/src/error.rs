//! Error types for corridor agents.
//!
//! Every variant except a configuration failure is local to one round: the
//! bottleneck logs it, records it in the interval statistics and moves on.

use corridor_broker::BrokerError;
use corridor_core::{AgentId, CommitmentId, CoreError, RoundId};
use thiserror::Error;

/// Errors that can occur while agents negotiate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A reply did not arrive within the round timeout.
    #[error("negotiation timed out in round {round} waiting on {agent}")]
    NegotiationTimeout {
        /// Agent whose thread stayed open.
        agent: AgentId,
        /// Round that timed out.
        round: RoundId,
    },

    /// An accepted commitment was not honored.
    #[error("commitment {commitment} violated by {agent}")]
    CommitmentViolation {
        /// The violated commitment.
        commitment: CommitmentId,
        /// Proposer that failed to shift.
        agent: AgentId,
    },

    /// Arbitration produced an allocation above capacity.
    #[error("allocation overbooks the {window} window: {load}/{capacity}")]
    CapacityOverbook {
        /// Window that overflowed.
        window: String,
        /// Students admitted to the window.
        load: u32,
        /// Window capacity.
        capacity: u32,
    },

    /// Bottleneck phase machine refused a transition.
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidPhase {
        /// Current phase.
        from: String,
        /// Requested phase.
        to: String,
    },

    /// Classroom parameters are out of range.
    #[error("invalid classroom profile for {agent}: {reason}")]
    InvalidProfile {
        /// Classroom id.
        agent: AgentId,
        /// What is wrong.
        reason: String,
    },

    /// The agent's mailbox was closed by the broker.
    #[error("mailbox of {0} closed")]
    MailboxClosed(AgentId),

    /// The agent task is no longer running.
    #[error("agent {0} is not running")]
    Stopped(AgentId),

    /// The agent task panicked or was aborted.
    #[error("agent task failed: {0}")]
    Task(String),

    /// Broker error.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_convert() {
        let agent = AgentId::new("A").unwrap();
        let err: AgentError = BrokerError::UnknownRecipient(agent).into();
        assert!(matches!(err, AgentError::Broker(BrokerError::UnknownRecipient(_))));
        assert_eq!(err.to_string(), "unknown recipient: A");
    }

    #[test]
    fn overbook_display() {
        let err = AgentError::CapacityOverbook {
            window: "earlier".to_string(),
            load: 61,
            capacity: 50,
        };
        assert_eq!(err.to_string(), "allocation overbooks the earlier window: 61/50");
    }
}
