//! # Message Router
//!
//! Resolves a received message to the registered handlers, deserializes its
//! body, dispatches it and turns the outcome into a
//! [`MessageProcessingResult`].
//!
//! Handlers are tried in registration order. A handler whose context check,
//! deserialization or body filter rejects the message is skipped. The first
//! matching handler that succeeds wins; a matching handler that fails lets the
//! next matching handler run. When no handler processed the message, fallback
//! handlers are tried (context-specific ones before general ones). Panics
//! during routing are reported as [`MessageProcessingError::ProcessingInterrupted`].

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::registration::MessageHandlerCollection;
use crate::config::MessageRouterOptions;
use crate::error::HandlerError;
use crate::logging::log_routing_decision;
use crate::messaging::{
    MessageCorrelationInfo, MessageProcessingError, MessageProcessingResult, RoutingContext,
};

/// Outcome of trying the registered (non-fallback) handlers
#[derive(Debug)]
pub(crate) enum HandlerAttempt {
    Processed { handler: String },
    Failed { handler: String, error: Arc<HandlerError> },
    NoneMatched,
}

/// Outcome of trying fallback handlers
#[derive(Debug)]
pub(crate) enum FallbackAttempt {
    Processed { handler: String },
    Failed { handler: String, error: Arc<HandlerError> },
    NotAvailable,
}

/// Routes message bodies to registered handlers
#[derive(Debug, Clone)]
pub struct MessageRouter {
    handlers: MessageHandlerCollection,
    options: MessageRouterOptions,
}

impl MessageRouter {
    pub fn new(handlers: MessageHandlerCollection, options: MessageRouterOptions) -> Self {
        Self { handlers, options }
    }

    pub fn handlers(&self) -> &MessageHandlerCollection {
        &self.handlers
    }

    pub fn options(&self) -> &MessageRouterOptions {
        &self.options
    }

    /// Route `body` received with `context` to the registered handlers.
    ///
    /// Never fails: every outcome, including panics inside handlers, is
    /// reported through the returned result.
    pub async fn route_message<C: RoutingContext>(
        &self,
        body: &str,
        context: &C,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> MessageProcessingResult {
        let message_id = context.message_context().message_id().to_string();

        match AssertUnwindSafe(self.route_to_handlers(body, context, correlation, cancellation))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => interrupted_by_panic(&message_id, panic),
        }
    }

    async fn route_to_handlers(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> MessageProcessingResult {
        let message_context = context.message_context();
        let message_id = message_context.message_id();

        if self.handlers.is_empty() {
            warn!(
                message_id = %message_id,
                job_id = %message_context.job_id(),
                "No message handlers were registered to process the message"
            );
            return MessageProcessingResult::failure(
                message_id,
                MessageProcessingError::CannotFindMatchedHandler,
                "no handlers registered",
            );
        }

        let attempt = self
            .try_registered_handlers(body, context, correlation, cancellation)
            .await;
        if let HandlerAttempt::Processed { .. } = attempt {
            return MessageProcessingResult::success(message_id);
        }

        let fallback = self
            .try_fallback_handlers(body, context, correlation, cancellation)
            .await;

        self.interpret(message_id, attempt, fallback)
    }

    /// Combine the regular and fallback attempts into a result
    pub(crate) fn interpret(
        &self,
        message_id: &str,
        attempt: HandlerAttempt,
        fallback: FallbackAttempt,
    ) -> MessageProcessingResult {
        match (attempt, fallback) {
            (HandlerAttempt::Processed { .. }, _) | (_, FallbackAttempt::Processed { .. }) => {
                MessageProcessingResult::success(message_id)
            }
            (_, FallbackAttempt::Failed { handler, error }) => {
                MessageProcessingResult::failure_with_cause(
                    message_id,
                    MessageProcessingError::MatchedHandlerFailed,
                    format!("fallback message handler '{handler}' failed to process the message"),
                    error,
                )
            }
            (HandlerAttempt::Failed { handler, error }, FallbackAttempt::NotAvailable) => {
                MessageProcessingResult::failure_with_cause(
                    message_id,
                    MessageProcessingError::MatchedHandlerFailed,
                    format!("message handler '{handler}' matched but failed to process the message"),
                    error,
                )
            }
            (HandlerAttempt::NoneMatched, FallbackAttempt::NotAvailable) => {
                MessageProcessingResult::failure(
                    message_id,
                    MessageProcessingError::CannotFindMatchedHandler,
                    "no message handler matched the message and no fallback message handler was available",
                )
            }
        }
    }

    /// Try every registered handler in order until one processes the message
    pub(crate) async fn try_registered_handlers(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> HandlerAttempt {
        let message_context = context.message_context();
        let message_id = message_context.message_id();
        let job_id = message_context.job_id();
        let additional_members = self.options.deserialization.additional_members;
        let mut last_failure = None;

        for registration in self.handlers.handlers() {
            if !registration.can_process_message_based_on_context(context) {
                trace!(
                    message_id = %message_id,
                    handler = %registration.name(),
                    "Message handler skipped: context not accepted"
                );
                continue;
            }

            let message = match registration.try_deserialize(body, additional_members) {
                Ok(message) => message,
                Err(e) => {
                    trace!(
                        message_id = %message_id,
                        handler = %registration.name(),
                        message_type = %registration.message_type(),
                        error = %e,
                        "Message handler skipped: body could not be deserialized"
                    );
                    continue;
                }
            };

            if !registration.can_process_erased_message(&message) {
                trace!(
                    message_id = %message_id,
                    handler = %registration.name(),
                    "Message handler skipped: message body filter not matched"
                );
                continue;
            }

            debug!(
                message_id = %message_id,
                job_id = %job_id,
                handler = %registration.name(),
                message_type = %registration.message_type(),
                "Dispatching message to matched handler"
            );

            match registration
                .process(message, context, correlation, cancellation)
                .await
            {
                Ok(()) => {
                    log_routing_decision(message_id, job_id, Some(registration.name()), "processed", None);
                    return HandlerAttempt::Processed {
                        handler: registration.name().to_string(),
                    };
                }
                Err(e) => {
                    error!(
                        message_id = %message_id,
                        job_id = %job_id,
                        handler = %registration.name(),
                        error = %e,
                        "Matched message handler failed to process the message"
                    );
                    last_failure = Some((registration.name().to_string(), Arc::new(e)));
                }
            }
        }

        match last_failure {
            Some((handler, error)) => HandlerAttempt::Failed { handler, error },
            None => {
                log_routing_decision(message_id, job_id, None, "none_matched", None);
                HandlerAttempt::NoneMatched
            }
        }
    }

    /// Try the body-only fallback handlers, context-specific ones first
    pub(crate) async fn try_fallback_handlers(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> FallbackAttempt {
        let message_context = context.message_context();
        let message_id = message_context.message_id();
        let job_id = message_context.job_id();

        let fallbacks = self.handlers.fallback_handlers();
        let ordered = fallbacks
            .iter()
            .filter(|fallback| fallback.is_context_specific())
            .chain(fallbacks.iter().filter(|fallback| !fallback.is_context_specific()));

        let mut last_failure = None;
        for fallback in ordered {
            if !fallback.can_process_message_based_on_context(context) {
                continue;
            }

            match fallback.process(body, context, correlation, cancellation).await {
                Ok(()) => {
                    log_routing_decision(message_id, job_id, Some(fallback.name()), "fallback_processed", None);
                    return FallbackAttempt::Processed {
                        handler: fallback.name().to_string(),
                    };
                }
                Err(e) => {
                    error!(
                        message_id = %message_id,
                        job_id = %job_id,
                        fallback_handler = %fallback.name(),
                        error = %e,
                        "Fallback message handler failed to process the message"
                    );
                    last_failure = Some((fallback.name().to_string(), Arc::new(e)));
                }
            }
        }

        match last_failure {
            Some((handler, error)) => FallbackAttempt::Failed { handler, error },
            None => FallbackAttempt::NotAvailable,
        }
    }
}

/// Readable text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn interrupted_by_panic(
    message_id: &str,
    panic: Box<dyn Any + Send>,
) -> MessageProcessingResult {
    let reason = panic_message(panic.as_ref());
    error!(
        message_id = %message_id,
        critical = true,
        panic = %reason,
        "Unexpected failure while routing the message"
    );
    let cause: HandlerError = reason.clone().into();
    MessageProcessingResult::failure_with_cause(
        message_id,
        MessageProcessingError::ProcessingInterrupted,
        format!("message routing was interrupted by an unexpected failure: {reason}"),
        Arc::new(cause),
    )
}
