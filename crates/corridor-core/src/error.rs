//! Error types for corridor-core.

use thiserror::Error;

/// Invalid static configuration. Fatal at startup: no partial run is attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A parameter that must be strictly positive was zero or negative.
    #[error("configuration parameter `{field}` must be positive")]
    NonPositive {
        /// Name of the offending parameter.
        field: &'static str,
    },

    /// A parameter fell outside its allowed range.
    #[error("configuration parameter `{field}` out of range: {value} (expected {expected})")]
    OutOfRange {
        /// Name of the offending parameter.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Human readable description of the allowed range.
        expected: &'static str,
    },
}

/// Errors that can occur in corridor core operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Adjustment magnitude exceeds the configured maximum.
    #[error("adjustment of {minutes} minutes exceeds the maximum of {max}")]
    AdjustmentOutOfBounds {
        /// Requested signed adjustment in minutes.
        minutes: i32,
        /// Configured maximum magnitude.
        max: u32,
    },

    /// The sign of an adjustment disagrees with its exit kind.
    #[error("{kind} exit cannot shift by {minutes} minutes")]
    ExitKindMismatch {
        /// Exit kind.
        kind: &'static str,
        /// Signed minutes carried with it.
        minutes: i32,
    },

    /// A zero-minute adjustment is not a concession.
    #[error("adjustment must be non-zero")]
    ZeroAdjustment,

    /// Commitment state machine rejected a transition.
    #[error("invalid commitment transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Proposer and acceptor must be distinct agents.
    #[error("commitment parties must differ, got {0} twice")]
    SelfCommitment(String),

    /// Invalid agent identifier.
    #[error("invalid agent id: {0}")]
    InvalidId(String),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
