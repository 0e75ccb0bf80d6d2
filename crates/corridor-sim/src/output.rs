//! Output formatting for episode statistics.

use std::io::{self, Write};

use crate::cli::Format;
use crate::episode::EpisodeStats;

/// Writes `stats` to `writer` in `format`.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_episode<W: Write>(
    writer: &mut W,
    stats: &EpisodeStats,
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *writer, stats)?;
            writeln!(writer)
        }
        Format::Table => write_table(writer, stats),
    }
}

fn write_table<W: Write>(writer: &mut W, stats: &EpisodeStats) -> io::Result<()> {
    writeln!(
        writer,
        "Episode {}: {} intervals, {} negotiations ({} resolved, {} cancelled)",
        stats.episode,
        stats.intervals.len(),
        stats.negotiations,
        stats.resolved_rounds,
        stats.cancelled_rounds
    )?;
    writeln!(
        writer,
        "  commitments: {} admitted, {} rejected, {} fulfilled, {} violated; {} timeouts",
        stats.admitted, stats.rejected, stats.fulfilled, stats.violated, stats.timeouts
    )?;
    writeln!(
        writer,
        "  mean utilization {:.2}, clearance saved {} min",
        stats.mean_utilization, stats.clearance_saved_mins
    )?;
    writeln!(
        writer,
        "  {:<9} {:>8} {:>5} {:<15} {:>6} {:>5}",
        "INTERVAL", "ARRIVALS", "RISK", "OUTCOME", "MOVED", "UTIL"
    )?;
    for interval in &stats.intervals {
        writeln!(
            writer,
            "  {:<9} {:>8} {:>5.2} {:<15} {:>6} {:>5.2}",
            interval.interval,
            interval.arrivals,
            interval.risk,
            interval.outcome.to_string(),
            interval.moved,
            interval.utilization
        )?;
    }
    let trust: Vec<_> = stats
        .trust
        .iter()
        .map(|(agent, trust)| format!("{agent}={trust:.2}"))
        .collect();
    if !trust.is_empty() {
        writeln!(writer, "  trust: {}", trust.join(" "))?;
    }
    let strikes: Vec<_> = stats
        .violations
        .iter()
        .map(|(agent, strikes)| format!("{agent}={strikes}"))
        .collect();
    if !strikes.is_empty() {
        writeln!(writer, "  strikes: {}", strikes.join(" "))?;
    }
    Ok(())
}
