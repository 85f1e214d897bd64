//! Fallback handlers receiving the raw Service Bus message.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::ServiceBusMessageContext;
use crate::error::HandlerError;
use crate::messaging::{MessageCorrelationInfo, ServiceBusReceivedMessage};
use crate::routing::Predicate;

/// Last-resort handler for Service Bus messages no regular handler processed.
///
/// Tried before the body-only
/// [`FallbackMessageHandler`](crate::routing::FallbackMessageHandler)s.
#[async_trait]
pub trait ServiceBusFallbackMessageHandler: Send + Sync {
    async fn process_message(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// A registered Service Bus fallback handler
#[derive(Clone)]
pub struct ServiceBusFallbackRegistration {
    name: String,
    handler: Arc<dyn ServiceBusFallbackMessageHandler>,
    context_filter: Predicate<ServiceBusMessageContext>,
}

impl ServiceBusFallbackRegistration {
    pub(crate) fn new(
        name: &str,
        handler: Arc<dyn ServiceBusFallbackMessageHandler>,
        context_filter: Predicate<ServiceBusMessageContext>,
    ) -> Self {
        Self {
            name: name.to_string(),
            handler,
            context_filter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_process_message_based_on_context(&self, context: &ServiceBusMessageContext) -> bool {
        self.context_filter.evaluate(context)
    }

    pub(crate) async fn process(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.handler
            .process_message(message, context, correlation, cancellation)
            .await
    }
}

impl fmt::Debug for ServiceBusFallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusFallbackRegistration")
            .field("name", &self.name)
            .field("context_filter", &self.context_filter)
            .finish()
    }
}
