//! # corridor-core
//!
//! Shared primitives for negotiating access to a capacity-limited corridor.
//!
//! This crate provides:
//!
//! - [`AgentId`], [`RoundId`], [`CommitmentId`] — identities used on the wire
//! - [`NegotiationConfig`] — validated static configuration
//! - [`Commitment`] — bilateral schedule adjustment with its lifecycle
//! - [`TrustTable`] — per counter-party trust scores
//! - [`ObligationLedger`] — signed obligation credits per counter-party
//! - [`ViolationCounter`] — strike tracking and eligibility
//! - [`CongestionSnapshot`] — arrivals, capacity and derived risk
//!
//! ## Example
//!
//! ```rust
//! use corridor_core::{CongestionSnapshot, NegotiationConfig};
//!
//! let config = NegotiationConfig::builder().capacity(50).build().unwrap();
//! let snapshot = CongestionSnapshot::from_total(80, &config);
//!
//! assert!((snapshot.risk() - 0.6).abs() < 1e-9);
//! assert!(snapshot.exceeds(config.risk_threshold));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commitment;
pub mod config;
pub mod congestion;
pub mod error;
pub mod ids;
pub mod obligation;
pub mod trust;
pub mod violation;

pub use commitment::{
    Adjustment, Commitment, CommitmentState, ExitKind, ShiftDirection, TransitionLog,
};
pub use config::{NegotiationConfig, NegotiationConfigBuilder};
pub use congestion::{CongestionSnapshot, ExitBatch};
pub use error::{ConfigError, CoreError, CoreResult};
pub use ids::{AgentId, AgentRole, CommitmentId, RoundId};
pub use obligation::ObligationLedger;
pub use trust::{TrustScore, TrustTable};
pub use violation::{StrikeRecord, ViolationCounter};
