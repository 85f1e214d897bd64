//! Error types for the busroute system.
//!

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusrouteError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Pump error: {0}")]
    PumpError(String),
    #[error("Message pump not found for job id: {0}")]
    PumpNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BusrouteError {
    /// Argument validation failure raised at setup time
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<serde_json::Error> for BusrouteError {
    fn from(error: serde_json::Error) -> Self {
        BusrouteError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<MessagingError> for BusrouteError {
    fn from(error: MessagingError) -> Self {
        BusrouteError::MessagingError(error.to_string())
    }
}

impl From<ConfigurationError> for BusrouteError {
    fn from(error: ConfigurationError) -> Self {
        BusrouteError::ConfigurationError(error.to_string())
    }
}

pub type BusrouteResult<T> = anyhow::Result<T, BusrouteError>;

/// Error type returned by message handlers.
///
/// Any error a handler raises is captured into the processing result; it never
/// escapes the router.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
