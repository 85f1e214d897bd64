//! # Message Pump
//!
//! The [`MessagePump`] trait implemented by the receiver and session pumps,
//! and the state and per-message routing both share.
//!
//! Cancellation is cooperative: once the host shuts down or the pump is
//! stopped, no new handler invocation starts (the message is abandoned
//! instead), while handler calls already running finish on their own.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit_breaker::MessagePumpCircuitState;
use super::lifecycle::{MessagePumpState, PumpStateCell};
use crate::config::MessagePumpCircuitBreakerOptions;
use crate::error::{BusrouteError, BusrouteResult};
use crate::messaging::{
    MessageCorrelationInfo, MessageProcessingError, MessageProcessingResult, ServiceBusReceivedMessage,
};
use crate::servicebus::{ServiceBusMessageContext, ServiceBusMessageRouter};

/// A background process receiving messages from one entity and routing them
#[async_trait]
pub trait MessagePump: Send + Sync + std::fmt::Debug {
    /// Identifier of the pump; scopes handler collections and circuit control
    fn job_id(&self) -> &str;

    fn state(&self) -> MessagePumpState;

    /// Circuit state, for pumps with a circuit breaker
    fn circuit_state(&self) -> Option<MessagePumpCircuitState> {
        None
    }

    /// Whether the host or the pump itself is shutting down
    fn is_host_shutting_down(&self) -> bool;

    async fn start(&self) -> BusrouteResult<()>;

    /// Stop receiving, wait for in-flight messages and release broker resources
    async fn stop(&self) -> BusrouteResult<()>;

    async fn restart(&self) -> BusrouteResult<()> {
        self.stop().await?;
        self.start().await
    }

    /// Pause message retrieval (open the circuit)
    async fn notify_pause_receive_messages(
        &self,
        _options: MessagePumpCircuitBreakerOptions,
    ) -> BusrouteResult<()> {
        Err(BusrouteError::InvalidState(format!(
            "message pump '{}' has no circuit breaker to pause",
            self.job_id()
        )))
    }

    /// Resume message retrieval (close the circuit)
    async fn notify_resume_retrieving_messages(&self) -> BusrouteResult<()> {
        Err(BusrouteError::InvalidState(format!(
            "message pump '{}' has no circuit breaker to resume",
            self.job_id()
        )))
    }
}

/// Runtime statistics of a message pump
#[derive(Debug, Default)]
pub struct MessagePumpStats {
    pub messages_received: AtomicU64,
    pub messages_succeeded: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_interrupted: AtomicU64,
    pub receive_errors: AtomicU64,
}

impl MessagePumpStats {
    pub(crate) fn record(&self, result: &MessageProcessingResult) {
        match result.error() {
            None => self.messages_succeeded.fetch_add(1, Ordering::Relaxed),
            Some(MessageProcessingError::ProcessingInterrupted) => {
                self.messages_interrupted.fetch_add(1, Ordering::Relaxed)
            }
            Some(_) => self.messages_failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> MessagePumpStatsSnapshot {
        MessagePumpStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_succeeded: self.messages_succeeded.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_interrupted: self.messages_interrupted.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MessagePumpStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessagePumpStatsSnapshot {
    pub messages_received: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
    pub messages_interrupted: u64,
    pub receive_errors: u64,
}

/// State shared by the pump implementations
#[derive(Debug)]
pub(crate) struct PumpCore {
    pub(crate) job_id: String,
    pub(crate) state: PumpStateCell,
    pub(crate) router: ServiceBusMessageRouter,
    pub(crate) stats: MessagePumpStats,
    host_cancellation: CancellationToken,
    pump_cancellation: Mutex<CancellationToken>,
}

impl PumpCore {
    pub(crate) fn new(
        job_id: String,
        router: ServiceBusMessageRouter,
        host_cancellation: CancellationToken,
    ) -> Self {
        let pump_cancellation = host_cancellation.child_token();
        Self {
            state: PumpStateCell::new(&job_id),
            job_id,
            router,
            stats: MessagePumpStats::default(),
            host_cancellation,
            pump_cancellation: Mutex::new(pump_cancellation),
        }
    }

    pub(crate) fn host_cancellation(&self) -> &CancellationToken {
        &self.host_cancellation
    }

    /// Token of the current run; cancelled by `stop` and by host shutdown
    pub(crate) fn pump_cancellation(&self) -> CancellationToken {
        self.pump_cancellation.lock().clone()
    }

    /// Fresh run token for a (re)start
    pub(crate) fn renew_pump_cancellation(&self) -> CancellationToken {
        let token = self.host_cancellation.child_token();
        *self.pump_cancellation.lock() = token.clone();
        token
    }

    pub(crate) fn is_host_shutting_down(&self) -> bool {
        self.host_cancellation.is_cancelled()
            || matches!(
                self.state.get(),
                MessagePumpState::ShuttingDown | MessagePumpState::Stopped
            )
    }

    /// Route one received message unless shutdown was signalled, in which
    /// case the message is abandoned without invoking any handler
    pub(crate) async fn route_message(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        cancellation: &CancellationToken,
    ) -> MessageProcessingResult {
        if self.is_host_shutting_down() || cancellation.is_cancelled() {
            warn!(
                job_id = %self.job_id,
                message_id = %message.message_id,
                "Message pump is shutting down, abandoning message without processing"
            );
            if let Err(e) = context.abandon_message(None).await {
                warn!(
                    job_id = %self.job_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to abandon message during shutdown"
                );
            }
            let result = MessageProcessingResult::failure(
                &message.message_id,
                MessageProcessingError::ProcessingInterrupted,
                "message pump is shutting down, message was abandoned without processing",
            );
            self.stats.record(&result);
            return result;
        }

        let correlation =
            MessageCorrelationInfo::from_message(message, self.router.options().correlation);
        debug!(
            job_id = %self.job_id,
            message_id = %message.message_id,
            transaction_id = %correlation.transaction_id,
            operation_id = %correlation.operation_id,
            delivery_count = message.delivery_count,
            "Routing received message"
        );

        let result = self
            .router
            .route_message(message, context, &correlation, cancellation)
            .await;

        if result.is_successful() {
            debug!(job_id = %self.job_id, message_id = %message.message_id, "Message processed");
        } else {
            warn!(
                job_id = %self.job_id,
                message_id = %message.message_id,
                error = ?result.error(),
                description = result.error_message().unwrap_or_default(),
                "Message was not processed"
            );
        }
        self.stats.record(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageRouterOptions;
    use crate::messaging::clients::InMemoryServiceBusReceiver;
    use crate::messaging::ServiceBusReceiver;
    use crate::routing::MessageHandlerCollection;
    use crate::servicebus::ServiceBusEntityType;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_host_shutdown_abandons_without_routing() {
        let host = CancellationToken::new();
        let router = ServiceBusMessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());
        let core = PumpCore::new("job-1".to_string(), router, host.clone());

        let receiver = Arc::new(InMemoryServiceBusReceiver::new("ns", "orders"));
        receiver.send_message(ServiceBusReceivedMessage::new("msg-1", b"{}".to_vec()));
        let message = receiver.receive_message(None).await.unwrap().unwrap();
        let context =
            ServiceBusMessageContext::from_receiver("job-1", ServiceBusEntityType::Queue, receiver.clone(), &message)
                .unwrap();

        host.cancel();
        assert!(core.is_host_shutting_down());

        let result = core.route_message(&message, &context, &core.pump_cancellation()).await;
        assert_eq!(result.error(), Some(MessageProcessingError::ProcessingInterrupted));
        assert_eq!(receiver.abandoned_count(), 1);
        assert!(receiver.dead_lettered_messages().is_empty());
        assert_eq!(core.stats.snapshot().messages_interrupted, 1);
    }

    #[test]
    fn test_renewed_token_is_independent_of_cancelled_run() {
        let router = ServiceBusMessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());
        let core = PumpCore::new("job-1".to_string(), router, CancellationToken::new());

        let first = core.pump_cancellation();
        first.cancel();
        let second = core.renew_pump_cancellation();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!core.pump_cancellation().is_cancelled());
    }
}
