//! Logging via the tracing crate.
//!
//! Diagnostics go to stderr so that stdout carries only ledger output.

use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Logging output format.
///
/// Defaults to "text".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFormat {
    /// Text format.
    #[default]
    Text,
    /// JSON format.
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to install logger: {0}")]
pub struct LoggingError(String);

/// Initializes the global logger.
///
/// Call once per process; a second call fails because the subscriber is
/// global.
pub fn init(format: LoggingFormat) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter);
    match format {
        LoggingFormat::Text => builder.try_init(),
        LoggingFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| LoggingError(e.to_string()))
}
