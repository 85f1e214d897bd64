//! # Messaging Error Types
//!
//! Error handling for broker-facing operations (receive, settle, session
//! processing) using thiserror for structured error types instead of
//! `Box<dyn Error>` patterns.

use thiserror::Error;

/// Broker-level messaging errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Receive failed on {entity_path}: {message}")]
    Receive {
        entity_path: String,
        message: String,
    },

    #[error("Settlement failed: {operation} for message {message_id}: {message}")]
    Settlement {
        operation: String,
        message_id: String,
        message: String,
    },

    #[error("Message lock lost for lock token: {lock_token}")]
    MessageLockLost { lock_token: String },

    #[error("No settlement available for message {message_id}")]
    SettlementUnavailable { message_id: String },

    #[error("Receiver closed: {entity_path}")]
    ReceiverClosed { entity_path: String },

    #[error("Session processor error: {message}")]
    SessionProcessor { message: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },
}

impl MessagingError {
    /// Create a receive error
    pub fn receive(entity_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receive {
            entity_path: entity_path.into(),
            message: message.into(),
        }
    }

    /// Create a settlement error
    pub fn settlement(
        operation: impl Into<String>,
        message_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Settlement {
            operation: operation.into(),
            message_id: message_id.into(),
            message: message.into(),
        }
    }

    /// Create a lock lost error
    pub fn message_lock_lost(lock_token: impl Into<String>) -> Self {
        Self::MessageLockLost {
            lock_token: lock_token.into(),
        }
    }

    /// Create a settlement unavailable error
    pub fn settlement_unavailable(message_id: impl Into<String>) -> Self {
        Self::SettlementUnavailable {
            message_id: message_id.into(),
        }
    }

    /// Create a receiver closed error
    pub fn receiver_closed(entity_path: impl Into<String>) -> Self {
        Self::ReceiverClosed {
            entity_path: entity_path.into(),
        }
    }

    /// Create a session processor error
    pub fn session_processor(message: impl Into<String>) -> Self {
        Self::SessionProcessor {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether this error is cancellation-shaped and should stop a receive loop
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the receiver has to be recreated before the next receive
    pub fn requires_new_receiver(&self) -> bool {
        matches!(self, Self::ReceiverClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let error = MessagingError::settlement("complete", "msg-1", "lock expired");
        assert_eq!(
            error.to_string(),
            "Settlement failed: complete for message msg-1: lock expired"
        );

        let error = MessagingError::receive("orders", "connection reset");
        assert!(error.to_string().contains("orders"));
    }

    #[test]
    fn test_error_classification() {
        assert!(MessagingError::cancelled("receive").is_cancellation());
        assert!(!MessagingError::receive("orders", "boom").is_cancellation());
        assert!(MessagingError::receiver_closed("orders").requires_new_receiver());
        assert!(!MessagingError::message_lock_lost("t").requires_new_receiver());
    }
}
