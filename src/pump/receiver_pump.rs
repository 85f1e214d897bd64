//! # Service Bus Receiver Message Pump
//!
//! Polls a non-session receiver and routes messages through the circuit
//! breaker states:
//!
//! - **Closed**: receive a batch of up to `max_messages_per_batch` and route
//!   all of them concurrently; the next batch is received once the whole batch
//!   finished, so at most one batch is in flight
//! - **Open**: wait the message recovery period (or a resume notification),
//!   then move to HalfOpen; pausing again restarts the wait with the new period
//! - **HalfOpen**: receive and route one message at a time, waiting the
//!   interval during recovery after each failure, until one succeeds and the
//!   circuit closes again
//!
//! Only [`MessagePump::notify_pause_receive_messages`] opens the circuit.
//! Failures inside the loop never end it; cancellation does.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::{
    CircuitBreakerEventHandler, CircuitState, MessagePumpCircuitState, PumpCircuitBreaker,
};
use super::lifecycle::MessagePumpState;
use super::message_pump::{MessagePump, MessagePumpStatsSnapshot, PumpCore};
use crate::config::{MessagePumpCircuitBreakerOptions, ServiceBusMessagePumpOptions};
use crate::constants::{RECEIVE_FAILURE_BACKOFF, RECEIVE_MAX_WAIT_TIME};
use crate::error::{BusrouteError, BusrouteResult};
use crate::logging::log_pump_operation;
use crate::messaging::receiver::MessagingResult;
use crate::messaging::{
    MessageProcessingError, MessageProcessingResult, MessagingError, ServiceBusReceivedMessage,
    ServiceBusReceiver, ServiceBusReceiverFactory,
};
use crate::servicebus::{ServiceBusEntityType, ServiceBusMessageContext, ServiceBusMessageRouter};

/// Builder of a [`ServiceBusReceiverMessagePump`]
pub struct ServiceBusReceiverMessagePumpBuilder {
    router: ServiceBusMessageRouter,
    receiver_factory: Arc<dyn ServiceBusReceiverFactory>,
    options: ServiceBusMessagePumpOptions,
    entity_type: Option<ServiceBusEntityType>,
    host_cancellation: CancellationToken,
    event_handlers: Vec<Arc<dyn CircuitBreakerEventHandler>>,
}

impl ServiceBusReceiverMessagePumpBuilder {
    /// Entity type of the receiver; inferred from the entity path when unset
    pub fn entity_type(mut self, entity_type: ServiceBusEntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    /// Token cancelled when the hosting application shuts down
    pub fn host_cancellation(mut self, token: CancellationToken) -> Self {
        self.host_cancellation = token;
        self
    }

    pub fn circuit_breaker_event_handler(mut self, handler: Arc<dyn CircuitBreakerEventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    pub fn build(self) -> BusrouteResult<ServiceBusReceiverMessagePump> {
        self.options.validate()?;

        let circuit = PumpCircuitBreaker::new(
            self.options.job_id.clone(),
            self.options.circuit_breaker.clone(),
            self.event_handlers,
        );

        Ok(ServiceBusReceiverMessagePump {
            inner: Arc::new(ReceiverPumpInner {
                core: PumpCore::new(self.options.job_id.clone(), self.router, self.host_cancellation),
                options: self.options,
                entity_type: self.entity_type,
                receiver_factory: self.receiver_factory,
                receiver: RwLock::new(None),
                circuit,
                circuit_signal: Notify::new(),
                receive_loop: Mutex::new(None),
            }),
        })
    }
}

/// Message pump polling a queue or topic subscription receiver
#[derive(Debug, Clone)]
pub struct ServiceBusReceiverMessagePump {
    inner: Arc<ReceiverPumpInner>,
}

struct ReceiverPumpInner {
    core: PumpCore,
    options: ServiceBusMessagePumpOptions,
    entity_type: Option<ServiceBusEntityType>,
    receiver_factory: Arc<dyn ServiceBusReceiverFactory>,
    receiver: RwLock<Option<Arc<dyn ServiceBusReceiver>>>,
    circuit: PumpCircuitBreaker,
    /// Wakes the loop waiting in Open on resume or a repeated pause
    circuit_signal: Notify,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReceiverPumpInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusReceiverMessagePump")
            .field("job_id", &self.core.job_id)
            .field("state", &self.core.state.get())
            .field("circuit", &self.circuit.state())
            .field("max_messages_per_batch", &self.options.max_messages_per_batch)
            .finish()
    }
}

impl ServiceBusReceiverMessagePump {
    pub fn builder(
        router: ServiceBusMessageRouter,
        receiver_factory: Arc<dyn ServiceBusReceiverFactory>,
        options: ServiceBusMessagePumpOptions,
    ) -> ServiceBusReceiverMessagePumpBuilder {
        ServiceBusReceiverMessagePumpBuilder {
            router,
            receiver_factory,
            options,
            entity_type: None,
            host_cancellation: CancellationToken::new(),
            event_handlers: Vec::new(),
        }
    }

    pub fn options(&self) -> &ServiceBusMessagePumpOptions {
        &self.inner.options
    }

    /// Entity path of the current receiver
    pub fn entity_path(&self) -> Option<String> {
        self.inner
            .receiver
            .read()
            .as_ref()
            .map(|receiver| receiver.entity_path().to_string())
    }

    pub fn stats(&self) -> MessagePumpStatsSnapshot {
        self.inner.core.stats.snapshot()
    }

    /// Route a message received by this pump's receiver outside the loop
    pub async fn process_message(&self, message: &ServiceBusReceivedMessage) -> BusrouteResult<MessageProcessingResult> {
        let receiver = self.inner.current_receiver()?;
        let token = self.inner.core.pump_cancellation();
        Ok(self.inner.process_received(&receiver, message, &token).await)
    }
}

impl ReceiverPumpInner {
    fn current_receiver(&self) -> MessagingResult<Arc<dyn ServiceBusReceiver>> {
        self.receiver
            .read()
            .clone()
            .ok_or_else(|| MessagingError::receiver_closed("<no receiver>"))
    }

    fn entity_type_for(&self, receiver: &dyn ServiceBusReceiver) -> ServiceBusEntityType {
        self.entity_type
            .unwrap_or_else(|| ServiceBusEntityType::from_entity_path(receiver.entity_path()))
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let entity_path = self.current_receiver().ok().map(|r| r.entity_path().to_string());
        log_pump_operation("receive_loop", &self.core.job_id, entity_path.as_deref(), "started", None);

        while !token.is_cancelled() {
            let step = match self.circuit.state() {
                CircuitState::Closed => self.receive_batch(&token).await,
                CircuitState::Open => {
                    self.wait_for_recovery(&token).await;
                    Ok(())
                }
                CircuitState::HalfOpen => self.probe_single_message(&token).await,
            };

            if let Err(e) = step {
                if e.is_cancellation() || token.is_cancelled() {
                    debug!(job_id = %self.core.job_id, "Message pump receive loop cancelled");
                    break;
                }

                self.core.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %self.core.job_id,
                    critical = true,
                    error = %e,
                    "Unexpected failure in message pump receive loop, continuing"
                );

                if e.requires_new_receiver() {
                    if let Err(e) = self.recreate_receiver().await {
                        error!(
                            job_id = %self.core.job_id,
                            critical = true,
                            error = %e,
                            "Failed to recreate message receiver"
                        );
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_FAILURE_BACKOFF) => {}
                }
            }
        }

        // Host shutdown ends the run without a stop call
        if self.core.host_cancellation().is_cancelled()
            && self.core.state.transition(MessagePumpState::Running, MessagePumpState::ShuttingDown)
        {
            self.close_receiver().await;
            self.core.state.set(MessagePumpState::Stopped);
        }

        log_pump_operation("receive_loop", &self.core.job_id, entity_path.as_deref(), "stopped", None);
    }

    async fn receive_batch(&self, token: &CancellationToken) -> MessagingResult<()> {
        let receiver = self.current_receiver()?;
        let max_messages = self.options.max_messages_per_batch as usize;

        let messages = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(MessagingError::cancelled("receive_messages")),
            received = receiver.receive_messages(max_messages, Some(RECEIVE_MAX_WAIT_TIME)) => received?,
        };

        if messages.is_empty() {
            return Ok(());
        }

        self.core
            .stats
            .messages_received
            .fetch_add(messages.len() as u64, Ordering::Relaxed);
        debug!(
            job_id = %self.core.job_id,
            batch_size = messages.len(),
            "Received message batch"
        );

        join_all(
            messages
                .iter()
                .map(|message| self.process_received(&receiver, message, token)),
        )
        .await;

        Ok(())
    }

    async fn wait_for_recovery(&self, token: &CancellationToken) {
        let signalled = self.circuit_signal.notified();
        tokio::pin!(signalled);
        signalled.as_mut().enable();

        let circuit = self.circuit.current();
        if !circuit.is_open() {
            return;
        }
        let recovery_period = circuit.options().message_recovery_period;
        debug!(
            job_id = %self.core.job_id,
            recovery_period_ms = recovery_period.as_millis() as u64,
            "Message retrieval paused, waiting for recovery period"
        );

        // A resume closes the circuit; a repeated pause restarts the wait
        tokio::select! {
            _ = token.cancelled() => return,
            _ = signalled => return,
            _ = tokio::time::sleep(recovery_period) => {}
        }

        self.circuit.transition_to_half_open();
    }

    async fn probe_single_message(&self, token: &CancellationToken) -> MessagingResult<()> {
        let receiver = self.current_receiver()?;

        let message = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(MessagingError::cancelled("receive_message")),
            received = receiver.receive_message(Some(RECEIVE_MAX_WAIT_TIME)) => received?,
        };

        let Some(message) = message else {
            return Ok(());
        };
        self.core.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let result = self.process_received(&receiver, &message, token).await;
        if result.is_successful() {
            self.circuit.close_after_recovery();
            return Ok(());
        }

        let interval = self.circuit.current().options().message_interval_during_recovery;
        debug!(
            job_id = %self.core.job_id,
            message_id = %message.message_id,
            interval_ms = interval.as_millis() as u64,
            "Recovery probe failed, waiting before next probe"
        );
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        Ok(())
    }

    async fn process_received(
        &self,
        receiver: &Arc<dyn ServiceBusReceiver>,
        message: &ServiceBusReceivedMessage,
        token: &CancellationToken,
    ) -> MessageProcessingResult {
        let entity_type = self.entity_type_for(receiver.as_ref());
        match ServiceBusMessageContext::from_receiver(
            self.core.job_id.clone(),
            entity_type,
            Arc::clone(receiver),
            message,
        ) {
            Ok(context) => self.core.route_message(message, &context, token).await,
            Err(e) => {
                warn!(
                    job_id = %self.core.job_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Could not create message context, abandoning message"
                );
                if let Err(e) = receiver.abandon_message(message, None).await {
                    warn!(job_id = %self.core.job_id, error = %e, "Failed to abandon message");
                }
                let result = MessageProcessingResult::failure(
                    &message.message_id,
                    MessageProcessingError::ProcessingInterrupted,
                    format!("message context could not be created: {e}"),
                );
                self.core.stats.record(&result);
                result
            }
        }
    }

    async fn open_receiver(&self) -> BusrouteResult<()> {
        let receiver = self
            .receiver_factory
            .create_receiver(self.options.prefetch_count)
            .await?;
        *self.receiver.write() = Some(receiver);
        Ok(())
    }

    async fn recreate_receiver(&self) -> BusrouteResult<()> {
        info!(job_id = %self.core.job_id, "Recreating message receiver");
        self.close_receiver().await;
        self.open_receiver().await
    }

    async fn close_receiver(&self) {
        let receiver = self.receiver.write().take();
        if let Some(receiver) = receiver {
            if let Err(e) = receiver.close().await {
                warn!(job_id = %self.core.job_id, error = %e, "Failed to close message receiver");
            }
        }
    }
}

#[async_trait]
impl MessagePump for ServiceBusReceiverMessagePump {
    fn job_id(&self) -> &str {
        &self.inner.core.job_id
    }

    fn state(&self) -> MessagePumpState {
        self.inner.core.state.get()
    }

    fn circuit_state(&self) -> Option<MessagePumpCircuitState> {
        Some(self.inner.circuit.current())
    }

    fn is_host_shutting_down(&self) -> bool {
        self.inner.core.is_host_shutting_down()
    }

    async fn start(&self) -> BusrouteResult<()> {
        let inner = &self.inner;
        let current = inner.core.state.get();
        if !current.can_start() {
            return Err(BusrouteError::InvalidState(format!(
                "message pump '{}' cannot start while {current}",
                inner.core.job_id
            )));
        }
        if inner.core.host_cancellation().is_cancelled() {
            return Err(BusrouteError::InvalidState(format!(
                "message pump '{}' cannot start while the host is shutting down",
                inner.core.job_id
            )));
        }
        if !inner.core.state.transition(current, MessagePumpState::Starting) {
            return Err(BusrouteError::InvalidState(format!(
                "message pump '{}' is already starting",
                inner.core.job_id
            )));
        }

        if let Err(e) = inner.open_receiver().await {
            inner.core.state.transition(MessagePumpState::Starting, MessagePumpState::Stopped);
            log_pump_operation("start", &inner.core.job_id, None, "failed", Some(&e.to_string()));
            return Err(e);
        }

        inner.circuit.reset();
        let token = inner.core.renew_pump_cancellation();

        // Held until the loop handle is stored so a concurrent stop awaits it
        let mut receive_loop = inner.receive_loop.lock().await;
        if !inner.core.state.transition(MessagePumpState::Starting, MessagePumpState::Running) {
            drop(receive_loop);
            inner.close_receiver().await;
            log_pump_operation("start", &inner.core.job_id, None, "cancelled", Some("stopped while starting"));
            return Err(BusrouteError::InvalidState(format!(
                "message pump '{}' was stopped while starting",
                inner.core.job_id
            )));
        }
        *receive_loop = Some(tokio::spawn(Arc::clone(inner).run(token)));
        drop(receive_loop);

        log_pump_operation("start", &inner.core.job_id, self.entity_path().as_deref(), "running", None);
        Ok(())
    }

    async fn stop(&self) -> BusrouteResult<()> {
        let inner = &self.inner;
        let current = inner.core.state.get();
        if matches!(current, MessagePumpState::NotStarted | MessagePumpState::Stopped) {
            // The loop may still be finishing after a host shutdown
            let handle = inner.receive_loop.lock().await.take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            return Ok(());
        }

        inner.core.state.set(MessagePumpState::ShuttingDown);
        inner.core.pump_cancellation().cancel();

        let handle = inner.receive_loop.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job_id = %inner.core.job_id, error = %e, "Message pump receive loop ended abnormally");
            }
        }

        inner.close_receiver().await;
        inner.core.state.set(MessagePumpState::Stopped);
        log_pump_operation("stop", &inner.core.job_id, None, "stopped", None);
        Ok(())
    }

    async fn notify_pause_receive_messages(&self, options: MessagePumpCircuitBreakerOptions) -> BusrouteResult<()> {
        options.validate()?;
        info!(
            job_id = %self.inner.core.job_id,
            recovery_period_ms = options.message_recovery_period.as_millis() as u64,
            "Pausing message retrieval"
        );
        self.inner.circuit.transition_to_open(Some(options));
        self.inner.circuit_signal.notify_waiters();
        Ok(())
    }

    async fn notify_resume_retrieving_messages(&self) -> BusrouteResult<()> {
        info!(job_id = %self.inner.core.job_id, "Resuming message retrieval");
        self.inner.circuit.transition_to_closed();
        self.inner.circuit_signal.notify_waiters();
        Ok(())
    }
}
