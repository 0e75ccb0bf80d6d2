//! # corridor-agent
//!
//! Agents negotiating over a shared hallway bottleneck.
//!
//! This crate provides:
//!
//! - [`ClassroomAgent`] — offers, counters and honors schedule shifts
//! - [`BottleneckAgent`] — monitors congestion, runs rounds, arbitrates capacity
//! - [`policy`] — willingness, offer sizing and offer evaluation
//! - [`arbitration`] — trust-ranked admission against shoulder capacity
//! - [`ActorHandle`] — runs a classroom as a tokio task over its mailbox
//!
//! Classrooms run as actors; the bottleneck is driven one interval at a time
//! by [`BottleneckAgent::advance_interval`], which returns [`IntervalStats`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actor;
pub mod agent;
pub mod arbitration;
pub mod bottleneck;
pub mod classroom;
pub mod error;
pub mod policy;
pub mod stats;

pub use actor::{ActorHandle, dispatch};
pub use agent::{Agent, AgentControl, AgentCore, BOTTLENECK_KINDS, CLASSROOM_KINDS};
pub use arbitration::{Allocation, Candidate, Decision, Verdict, arbitrate};
pub use bottleneck::{BottleneckAgent, BottleneckPhase};
pub use classroom::{ClassroomAgent, ClassroomProfile, ClassroomView};
pub use error::{AgentError, AgentResult};
pub use policy::OfferDecision;
pub use stats::{CommitmentRecord, IntervalStats, RoundOutcome};
