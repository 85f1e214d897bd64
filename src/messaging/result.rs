//! # Message Processing Result
//!
//! Outcome of one routing attempt, consumed by the pump for settlement and
//! circuit-breaker decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;

/// Why routing did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageProcessingError {
    /// No registered handler matched, or none were registered at all
    CannotFindMatchedHandler,
    /// A handler matched but failed and no fallback resolved the message
    MatchedHandlerFailed,
    /// Shutdown, unreadable message, or unexpected failure during dispatch
    ProcessingInterrupted,
}

impl fmt::Display for MessageProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CannotFindMatchedHandler => write!(f, "CannotFindMatchedHandler"),
            Self::MatchedHandlerFailed => write!(f, "MatchedHandlerFailed"),
            Self::ProcessingInterrupted => write!(f, "ProcessingInterrupted"),
        }
    }
}

/// Result of routing a single message
#[derive(Debug, Clone)]
pub struct MessageProcessingResult {
    message_id: String,
    error: Option<MessageProcessingError>,
    error_message: Option<String>,
    error_cause: Option<Arc<HandlerError>>,
}

impl MessageProcessingResult {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            error: None,
            error_message: None,
            error_cause: None,
        }
    }

    pub fn failure(
        message_id: impl Into<String>,
        error: MessageProcessingError,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error: Some(error),
            error_message: Some(error_message.into()),
            error_cause: None,
        }
    }

    pub fn failure_with_cause(
        message_id: impl Into<String>,
        error: MessageProcessingError,
        error_message: impl Into<String>,
        cause: Arc<HandlerError>,
    ) -> Self {
        Self {
            error_cause: Some(cause),
            ..Self::failure(message_id, error, error_message)
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<MessageProcessingError> {
        self.error
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_cause(&self) -> Option<&Arc<HandlerError>> {
        self.error_cause.as_ref()
    }
}

impl fmt::Display for MessageProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, &self.error_message) {
            (None, _) => write!(f, "[Success] message {}", self.message_id),
            (Some(error), Some(message)) => {
                write!(f, "[Failure] message {}: {error} - {message}", self.message_id)
            }
            (Some(error), None) => write!(f, "[Failure] message {}: {error}", self.message_id),
        }
    }
}
