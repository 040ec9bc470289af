//! Logging setup errors

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}
