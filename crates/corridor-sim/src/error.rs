//! Error types for the episode driver.

use corridor_agent::AgentError;
use corridor_broker::BrokerError;
use corridor_core::{AgentId, ConfigError, CoreError};
use thiserror::Error;

/// Errors that can occur while building or driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid negotiation configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The scenario cannot be run.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// No classroom with this id takes part in the simulation.
    #[error("unknown classroom: {0}")]
    UnknownClassroom(AgentId),

    /// A classroom cannot forgive its own debt.
    #[error("{0} cannot forgive itself")]
    SelfForgiveness(AgentId),

    /// Agent error.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Broker error.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
