//! # Message Context
//!
//! Immutable metadata of one received message, built by the pump right before
//! routing and dropped once routing completes.
//!
//! Handlers declare the context type they accept. A handler declared for the
//! general [`MessageContext`] accepts every context; a handler declared for a
//! broker-specific context (such as
//! [`ServiceBusMessageContext`](crate::servicebus::ServiceBusMessageContext))
//! only accepts that context. [`HandlerContext::from_routing_context`] performs
//! that narrowing.

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;

use crate::error::{BusrouteError, BusrouteResult};

/// General message metadata shared by every broker
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContext {
    message_id: String,
    job_id: String,
    properties: HashMap<String, Value>,
}

impl MessageContext {
    /// Create a context; message id and job id must be non-empty
    pub fn new(
        message_id: impl Into<String>,
        job_id: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> BusrouteResult<Self> {
        let message_id = message_id.into();
        let job_id = job_id.into();

        if message_id.trim().is_empty() {
            return Err(BusrouteError::invalid_argument(
                "message id is required to create a message context",
            ));
        }
        if job_id.trim().is_empty() {
            return Err(BusrouteError::invalid_argument(
                "job id is required to create a message context",
            ));
        }

        Ok(Self {
            message_id,
            job_id,
            properties,
        })
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Job id of the pump that received the message
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A context the router can dispatch on
pub trait RoutingContext: Any + Send + Sync {
    /// The general metadata every context carries
    fn message_context(&self) -> &MessageContext;

    fn as_any(&self) -> &dyn Any;
}

/// A context type a handler can declare
pub trait HandlerContext: RoutingContext + Sized {
    /// Narrow a routed context to this type; `None` when incompatible
    fn from_routing_context(context: &dyn RoutingContext) -> Option<&Self>;
}

impl RoutingContext for MessageContext {
    fn message_context(&self) -> &MessageContext {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HandlerContext for MessageContext {
    fn from_routing_context(context: &dyn RoutingContext) -> Option<&Self> {
        Some(context.message_context())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_requires_identifiers() {
        assert!(MessageContext::new("", "job", HashMap::new()).is_err());
        assert!(MessageContext::new("msg-1", " ", HashMap::new()).is_err());

        let context = MessageContext::new("msg-1", "job", HashMap::new()).unwrap();
        assert_eq!(context.message_id(), "msg-1");
        assert_eq!(context.job_id(), "job");
    }

    #[test]
    fn test_general_context_accepts_any_routing_context() {
        let context = MessageContext::new("msg-1", "job", HashMap::new()).unwrap();
        let routed: &dyn RoutingContext = &context;

        let narrowed = MessageContext::from_routing_context(routed).unwrap();
        assert_eq!(narrowed.message_id(), "msg-1");
    }
}
