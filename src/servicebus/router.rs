//! # Service Bus Message Router
//!
//! Routes Service Bus messages like [`MessageRouter`] and settles what the
//! handlers leave behind, when the context carries a settlement strategy:
//!
//! | Outcome                                         | Settlement   |
//! |-------------------------------------------------|--------------|
//! | handler or fallback processed the message       | complete (auto-complete) |
//! | no handlers registered                          | dead-letter  |
//! | no handler matched, no fallback available       | dead-letter  |
//! | matched handler failed, no fallback available   | abandon      |
//! | fallback handlers failed                        | abandon      |
//! | unreadable body or unexpected failure           | abandon      |
//!
//! Messages the handler already settled are left alone.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::context::ServiceBusMessageContext;
use crate::config::MessageRouterOptions;
use crate::constants::dead_letter;
use crate::logging::log_routing_decision;
use crate::messaging::{
    MessageCorrelationInfo, MessageProcessingError, MessageProcessingResult, ServiceBusReceivedMessage,
};
use crate::routing::router::{interrupted_by_panic, FallbackAttempt, HandlerAttempt};
use crate::routing::{MessageHandlerCollection, MessageRouter};

/// Settlement the router applies after routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultSettlement {
    Complete,
    Abandon,
    DeadLetter {
        reason: &'static str,
        description: &'static str,
    },
}

/// Router for messages received from Service Bus
#[derive(Debug, Clone)]
pub struct ServiceBusMessageRouter {
    router: MessageRouter,
}

impl ServiceBusMessageRouter {
    pub fn new(handlers: MessageHandlerCollection, options: MessageRouterOptions) -> Self {
        Self {
            router: MessageRouter::new(handlers, options),
        }
    }

    /// The general router over the same handlers
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn options(&self) -> &MessageRouterOptions {
        self.router.options()
    }

    /// Route `message` and apply the default settlement for the outcome
    pub async fn route_message(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> MessageProcessingResult {
        let routed = AssertUnwindSafe(self.route_and_decide(message, context, correlation, cancellation))
            .catch_unwind()
            .await;

        let (result, settlement) = match routed {
            Ok(decision) => decision,
            Err(panic) => (
                interrupted_by_panic(context.message_id(), panic),
                DefaultSettlement::Abandon,
            ),
        };

        self.settle(context, settlement).await;
        result
    }

    async fn route_and_decide(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> (MessageProcessingResult, DefaultSettlement) {
        let message_id = context.message_id();

        let body = match message.body_as_str() {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    job_id = %context.job_id(),
                    error = %e,
                    "Message body is not valid UTF-8, abandoning message"
                );
                return (
                    MessageProcessingResult::failure(
                        message_id,
                        MessageProcessingError::ProcessingInterrupted,
                        format!("message body could not be read as UTF-8 text: {e}"),
                    ),
                    DefaultSettlement::Abandon,
                );
            }
        };

        if self.router.handlers().is_empty() {
            warn!(
                message_id = %message_id,
                job_id = %context.job_id(),
                "No message handlers were registered, dead-lettering message"
            );
            return (
                MessageProcessingResult::failure(
                    message_id,
                    MessageProcessingError::CannotFindMatchedHandler,
                    "no handlers registered",
                ),
                DefaultSettlement::DeadLetter {
                    reason: dead_letter::NO_HANDLERS_REGISTERED_REASON,
                    description: dead_letter::NO_HANDLERS_REGISTERED_DESCRIPTION,
                },
            );
        }

        let attempt = self
            .router
            .try_registered_handlers(body, context, correlation, cancellation)
            .await;
        if let HandlerAttempt::Processed { .. } = attempt {
            return (
                MessageProcessingResult::success(message_id),
                DefaultSettlement::Complete,
            );
        }

        let fallback = match self
            .try_service_bus_fallback_handlers(message, context, correlation, cancellation)
            .await
        {
            processed @ FallbackAttempt::Processed { .. } => processed,
            unresolved => match self
                .router
                .try_fallback_handlers(body, context, correlation, cancellation)
                .await
            {
                FallbackAttempt::NotAvailable => unresolved,
                attempted => attempted,
            },
        };

        let settlement = match (&attempt, &fallback) {
            (_, FallbackAttempt::Processed { .. }) => DefaultSettlement::Complete,
            (_, FallbackAttempt::Failed { .. }) | (HandlerAttempt::Failed { .. }, _) => {
                DefaultSettlement::Abandon
            }
            _ => DefaultSettlement::DeadLetter {
                reason: dead_letter::NO_HANDLER_MATCHED_REASON,
                description: dead_letter::NO_HANDLER_MATCHED_DESCRIPTION,
            },
        };

        (self.router.interpret(message_id, attempt, fallback), settlement)
    }

    async fn try_service_bus_fallback_handlers(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> FallbackAttempt {
        let mut last_failure = None;

        for fallback in self.router.handlers().service_bus_fallback_handlers() {
            if !fallback.can_process_message_based_on_context(context) {
                continue;
            }

            match fallback.process(message, context, correlation, cancellation).await {
                Ok(()) => {
                    log_routing_decision(
                        context.message_id(),
                        context.job_id(),
                        Some(fallback.name()),
                        "service_bus_fallback_processed",
                        None,
                    );
                    return FallbackAttempt::Processed {
                        handler: fallback.name().to_string(),
                    };
                }
                Err(e) => {
                    error!(
                        message_id = %context.message_id(),
                        job_id = %context.job_id(),
                        fallback_handler = %fallback.name(),
                        error = %e,
                        "Service Bus fallback message handler failed to process the message"
                    );
                    last_failure = Some((fallback.name().to_string(), std::sync::Arc::new(e)));
                }
            }
        }

        match last_failure {
            Some((handler, error)) => FallbackAttempt::Failed { handler, error },
            None => FallbackAttempt::NotAvailable,
        }
    }

    async fn settle(&self, context: &ServiceBusMessageContext, settlement: DefaultSettlement) {
        if !context.has_settlement() {
            debug!(
                message_id = %context.message_id(),
                "No settlement available for message, leaving settlement to the host"
            );
            return;
        }
        if context.is_settled() {
            return;
        }

        let (operation, result) = match settlement {
            DefaultSettlement::Complete => {
                if !self.options().auto_complete {
                    return;
                }
                ("complete", context.complete_message().await)
            }
            DefaultSettlement::Abandon => ("abandon", context.abandon_message(None).await),
            DefaultSettlement::DeadLetter {
                reason,
                description,
            } => (
                "dead_letter",
                context
                    .dead_letter_message(reason, Some(description), None)
                    .await,
            ),
        };

        match result {
            Ok(()) => log_routing_decision(
                context.message_id(),
                context.job_id(),
                None,
                operation,
                None,
            ),
            Err(e) => error!(
                message_id = %context.message_id(),
                job_id = %context.job_id(),
                operation = %operation,
                error = %e,
                "Failed to settle message"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::clients::InMemoryServiceBusReceiver;
    use crate::messaging::ServiceBusReceiver;
    use crate::servicebus::ServiceBusEntityType;
    use std::sync::Arc;

    async fn received(receiver: &InMemoryServiceBusReceiver, body: Vec<u8>) -> ServiceBusReceivedMessage {
        receiver.send_message(ServiceBusReceivedMessage::new("msg-1", body));
        receiver.receive_message(None).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_no_handlers_dead_letters_message() {
        let receiver = Arc::new(InMemoryServiceBusReceiver::new("ns", "orders"));
        let message = received(&receiver, b"{}".to_vec()).await;
        let context = ServiceBusMessageContext::from_receiver(
            "job",
            ServiceBusEntityType::Queue,
            receiver.clone(),
            &message,
        )
        .unwrap();

        let router = ServiceBusMessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());
        let result = router
            .route_message(&message, &context, &MessageCorrelationInfo::generate(), &CancellationToken::new())
            .await;

        assert_eq!(result.error(), Some(MessageProcessingError::CannotFindMatchedHandler));
        let dead_letters = receiver.dead_lettered_messages();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(
            dead_letters[0].dead_letter_reason.as_deref(),
            Some(dead_letter::NO_HANDLERS_REGISTERED_REASON)
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_abandoned() {
        let receiver = Arc::new(InMemoryServiceBusReceiver::new("ns", "orders"));
        let message = received(&receiver, vec![0xff, 0xfe]).await;
        let context = ServiceBusMessageContext::from_receiver(
            "job",
            ServiceBusEntityType::Queue,
            receiver.clone(),
            &message,
        )
        .unwrap();

        let router = ServiceBusMessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());
        let result = router
            .route_message(&message, &context, &MessageCorrelationInfo::generate(), &CancellationToken::new())
            .await;

        assert_eq!(result.error(), Some(MessageProcessingError::ProcessingInterrupted));
        assert_eq!(receiver.abandoned_count(), 1);
    }

    #[tokio::test]
    async fn test_without_settlement_only_result_is_returned() {
        let message = ServiceBusReceivedMessage::new("msg-1", b"{}".to_vec());
        let context =
            ServiceBusMessageContext::new("job", "ns", ServiceBusEntityType::Queue, "orders", &message).unwrap();

        let router = ServiceBusMessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());
        let result = router
            .route_message(&message, &context, &MessageCorrelationInfo::generate(), &CancellationToken::new())
            .await;

        assert_eq!(result.error(), Some(MessageProcessingError::CannotFindMatchedHandler));
        assert!(!context.is_settled());
    }
}
