//! # corridor-broker
//!
//! In-process message routing for corridor negotiation.
//!
//! This crate provides:
//!
//! - [`Payload`] / [`MessageKind`] — the closed set of negotiation messages
//! - [`MessageBroker`] — ordered per-agent mailboxes, broadcast, round logs
//! - [`PairTable`] — per-pair critical sections that keep at most one live
//!   commitment per pair and round
//!
//! ## Example
//!
//! ```rust
//! use corridor_broker::{Message, MessageBroker, MessageKind, Payload};
//! use corridor_core::AgentId;
//!
//! let broker = MessageBroker::new();
//! let hub = AgentId::new("Bottleneck").unwrap();
//! let _hub_box = broker.subscribe(hub.clone()).unwrap();
//! let mut room = broker.subscribe(AgentId::new("A").unwrap()).unwrap();
//!
//! broker
//!     .publish(Message::broadcast(hub, None, Payload::IntervalTick { interval: 1 }))
//!     .unwrap();
//!
//! assert_eq!(room.try_recv().unwrap().kind(), MessageKind::IntervalTick);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod message;
pub mod pairs;

pub use broker::{Mailbox, MessageBroker, RETAINED_ROUNDS, RoundStatus};
pub use error::{BrokerError, BrokerResult};
pub use message::{
    Envelope, ExecutedShift, IntervalReport, Message, MessageKind, NegotiationRequest, Payload,
    Proposal, Recipient, RejectReason, Rejection, ViolationNotice,
};
pub use pairs::{LiveEntry, PairKey, PairTable};
