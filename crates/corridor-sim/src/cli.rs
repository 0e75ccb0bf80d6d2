//! Command-line argument parsing with clap.

use clap::{Parser, ValueEnum};
use corridor_core::{ConfigError, NegotiationConfig};
use std::time::Duration;

/// Runs the lecture-hall corridor scenario and prints episode statistics.
#[derive(Parser, Debug, Clone)]
#[command(name = "corridor-sim")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of episodes to run.
    #[arg(short, long, default_value_t = 3)]
    pub episodes: u32,

    /// Intervals per episode.
    #[arg(short, long, default_value_t = 10)]
    pub intervals: u32,

    /// Seed for the classrooms' random sources.
    #[arg(long, env = "CORRIDOR_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Students the corridor clears per interval.
    #[arg(long, default_value_t = 60)]
    pub capacity: u32,

    /// Minutes needed to clear one batch.
    #[arg(long, default_value_t = 2)]
    pub clearance_time_mins: u32,

    /// Largest shift a commitment may carry, in minutes.
    #[arg(long, default_value_t = 10)]
    pub max_adjustment_mins: u32,

    /// Strikes after which a classroom is flagged.
    #[arg(long, default_value_t = 3)]
    pub violation_limit: u32,

    /// Risk above which a round opens.
    #[arg(long, default_value_t = 0.4)]
    pub risk_threshold: f64,

    /// Minutes between the batches of a staggered exit.
    #[arg(long, default_value_t = 2)]
    pub batch_spacing_mins: u32,

    /// Bound on every wait, in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub round_timeout_ms: u64,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

impl Cli {
    /// Negotiation parameters from the flags.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter.
    pub fn config(&self) -> Result<NegotiationConfig, ConfigError> {
        NegotiationConfig::builder()
            .capacity(self.capacity)
            .clearance_time_mins(self.clearance_time_mins)
            .max_adjustment_mins(self.max_adjustment_mins)
            .violation_limit(self.violation_limit)
            .risk_threshold(self.risk_threshold)
            .batch_spacing_mins(self.batch_spacing_mins)
            .round_timeout(Duration::from_millis(self.round_timeout_ms))
            .build()
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable summary.
    #[default]
    Table,
    /// JSON, one document per episode.
    Json,
}
