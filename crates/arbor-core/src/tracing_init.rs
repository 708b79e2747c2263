//! Shared tracing/logging initialization.
//!
//! The headless subcommands log to stderr. The TUI owns the terminal, so it
//! either logs to a file or not at all.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Where log lines go.
#[derive(Debug, Clone, Copy)]
pub enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
    Discard,
}

/// Build the env filter: `RUST_LOG` wins over the configured level.
fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"arbor=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool, target: LogTarget<'_>) -> crate::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    match target {
        LogTarget::Stderr if log_json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogTarget::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogTarget::File(path) => {
            let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);
            if log_json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(file))
                    .init();
            } else {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(file),
                    )
                    .init();
            }
        }
        LogTarget::Discard => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::sink))
            .init(),
    }
    Ok(())
}
