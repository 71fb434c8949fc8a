use media_relay_lib::RelayError;
use thiserror::Error;

/// Main error type for the relay server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;
