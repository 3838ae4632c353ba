//! Tracing subscriber setup for the binary

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber
///
/// Writes compact lines to stderr, or appends them to `file` when given.
/// Events from this crate are kept up to `level`; other crates are capped at
/// `warn`.
pub fn init(level: LevelFilter, file: Option<&Path>) -> Result<()> {
    let registry = tracing_subscriber::registry().with(targets(level));

    match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;

            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(file))
                        .compact()
                        .with_ansi(false),
                )
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        None => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .compact()
                        .with_ansi(false),
                )
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }

    Ok(())
}

/// The binary and the library share the `sensu_bridge` target
fn targets(level: LevelFilter) -> filter::Targets {
    filter::Targets::new()
        .with_default(LevelFilter::WARN.min(level))
        .with_target("sensu_bridge", level)
}
