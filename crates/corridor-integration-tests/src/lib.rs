//! Integration test crate for corridor negotiation.
//!
//! This crate exists solely to run integration tests that span the broker,
//! the agents and the episode driver. It has no public API.

#![forbid(unsafe_code)]
