//! Prusa exporter common library
//!
//! This crate provides shared types and utilities for the exporter:
//!
//! - [`config`] - Printers file loading and validation (JSON5 format)
//! - [`metric`] - Metric sample data model (`MetricSample`, `MetricKind`)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod metric;

use tracing::Level;

// Re-export commonly used types at the crate root
pub use config::{ExporterConfig, PrinterConfig, UdpConfig, load_config};
pub use error::{Error, Result};
pub use metric::{MetricKind, MetricSample};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Resolve a log level name, falling back to `INFO` on anything unrecognised.
pub fn resolve_log_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

/// Initialize tracing with the given level and format.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Example
///
/// ```ignore
/// use prusa_common::{LogFormat, init_tracing, resolve_log_level};
///
/// init_tracing(resolve_log_level("debug"), LogFormat::Json)?;
/// ```
pub fn init_tracing(level: Level, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
