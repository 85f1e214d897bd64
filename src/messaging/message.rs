//! # Received Message Structures
//!
//! Broker-agnostic representation of a message received from a Service Bus
//! queue or topic subscription, as handed to pumps and routers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::BusrouteResult;

/// Message received from a Service Bus entity
///
/// Carries the raw body bytes plus the broker metadata the router needs to build
/// a message context (lock token, delivery count, application properties).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceBusReceivedMessage {
    /// Application-assigned message identifier
    pub message_id: String,
    /// Raw message body
    pub body: Vec<u8>,
    /// Correlation identifier set by the sender
    pub correlation_id: Option<String>,
    /// Session the message belongs to (session-enabled entities only)
    pub session_id: Option<String>,
    /// Application-specific label
    pub subject: Option<String>,
    /// Body content type (e.g. `application/json`)
    pub content_type: Option<String>,
    /// User-defined application properties
    pub application_properties: HashMap<String, Value>,
    /// Lock token issued by the broker on receive
    pub lock_token: String,
    /// Number of times the message was delivered
    pub delivery_count: u32,
    /// Broker-assigned sequence number
    pub sequence_number: i64,
    /// When the message was accepted by the broker
    pub enqueued_time: DateTime<Utc>,
    /// Dead-letter reason, populated once dead-lettered
    pub dead_letter_reason: Option<String>,
    /// Dead-letter description, populated once dead-lettered
    pub dead_letter_error_description: Option<String>,
}

impl ServiceBusReceivedMessage {
    /// Create a new message with the given id and raw body
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            correlation_id: None,
            session_id: None,
            subject: None,
            content_type: None,
            application_properties: HashMap::new(),
            lock_token: Uuid::new_v4().to_string(),
            delivery_count: 0,
            sequence_number: 0,
            enqueued_time: Utc::now(),
            dead_letter_reason: None,
            dead_letter_error_description: None,
        }
    }

    /// Create a message whose body is the JSON representation of `payload`
    pub fn from_json<T: Serialize>(message_id: impl Into<String>, payload: &T) -> BusrouteResult<Self> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(message_id, body).with_content_type("application/json"))
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_application_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// Body as UTF-8 text
    pub fn body_as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Application property rendered as a string, if present
    pub fn application_property_str(&self, key: &str) -> Option<String> {
        self.application_properties.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_from_json() {
        let message =
            ServiceBusReceivedMessage::from_json("msg-1", &json!({"order_id": 42})).unwrap();

        assert_eq!(message.message_id, "msg-1");
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(message.body_as_str().unwrap(), r#"{"order_id":42}"#);
        assert!(!message.lock_token.is_empty());
    }

    #[test]
    fn test_application_property_rendering() {
        let message = ServiceBusReceivedMessage::new("msg-1", "body")
            .with_application_property("Transaction-Id", "tx-1")
            .with_application_property("Attempt", 3);

        assert_eq!(
            message.application_property_str("Transaction-Id").as_deref(),
            Some("tx-1")
        );
        assert_eq!(message.application_property_str("Attempt").as_deref(), Some("3"));
        assert_eq!(message.application_property_str("Missing"), None);
    }

    #[test]
    fn test_invalid_utf8_body() {
        let message = ServiceBusReceivedMessage::new("msg-1", vec![0xff, 0xfe]);
        assert!(message.body_as_str().is_err());
    }
}
