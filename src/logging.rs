//! Tracing subscriber setup.
//!
//! Log lines go to stderr so stdout stays reserved for the run summary and
//! CSV output. `RUST_LOG` takes precedence over the level passed in, e.g.
//! `RUST_LOG=fulfillment_sim::dispatch=debug`.

use tracing_subscriber::{EnvFilter, fmt};

use crate::error::LoggingError;

/// Parse a CLI log level or filter directive such as `info` or
/// `fulfillment_sim::dispatch=debug`.
pub fn parse_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|source| LoggingError::Filter {
        filter: filter.to_string(),
        source,
    })
}

/// Install the global subscriber. Thread names are included so every line
/// shows which worker (`picker-2`, `loader-1`, ...) emitted it.
pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(level)?,
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(LoggingError::Install)
}

/// Verbose logging captured by the test harness; safe to call repeatedly.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}
