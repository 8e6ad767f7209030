use thiserror::Error;

/// Common error type for the exporter components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using the exporter's Error.
pub type Result<T> = std::result::Result<T, Error>;
