//! # corridor-sim
//!
//! Episode driver for corridor negotiation.
//!
//! This crate provides:
//!
//! - [`Simulation`] — spawns the classroom tasks, drives the bottleneck one
//!   interval at a time, and exposes forgiveness, reinstatement and
//!   attendance revision
//! - [`Scenario`] — classrooms, trust seeds and configuration, including the
//!   three-classroom [`Scenario::lecture_hall`]
//! - [`EpisodeStats`] — totals over an episode of [`IntervalStats`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use corridor_core::NegotiationConfig;
//! use corridor_sim::{Scenario, Simulation};
//!
//! # async fn demo() -> Result<(), corridor_sim::SimError> {
//! let scenario = Scenario::lecture_hall(NegotiationConfig::default(), 7)?;
//! let mut sim = Simulation::new(scenario)?;
//! let stats = sim.run_episode(10).await?;
//! println!("{} commitments admitted", stats.admitted);
//! sim.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod episode;
pub mod error;
pub mod output;
pub mod scenario;
pub mod simulation;

pub use corridor_agent::IntervalStats;
pub use episode::EpisodeStats;
pub use error::{SimError, SimResult};
pub use scenario::{BOTTLENECK_ID, Scenario, TrustSeed};
pub use simulation::Simulation;
