//! corridor-sim binary entrypoint.
//!
//! Runs the lecture-hall scenario for a number of episodes and prints the
//! statistics of each. Logs go to stderr, filtered by `RUST_LOG`.

use std::io;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use corridor_sim::cli::Cli;
use corridor_sim::output::write_episode;
use corridor_sim::{Scenario, Simulation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("corridor_sim=info".parse()?))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let scenario = Scenario::lecture_hall(config, cli.seed)?;
    info!(
        episodes = cli.episodes,
        intervals = cli.intervals,
        seed = cli.seed,
        "running lecture-hall scenario"
    );

    let mut sim = Simulation::new(scenario)?;
    for _ in 0..cli.episodes {
        let stats = sim.run_episode(cli.intervals).await?;
        let mut stdout = io::stdout().lock();
        write_episode(&mut stdout, &stats, cli.format)?;
    }
    sim.shutdown().await?;
    Ok(())
}
