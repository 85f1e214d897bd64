//! # Service Bus Session Message Pump
//!
//! Drives a session processor: the processor owns the receive loop and
//! invokes the pump's callbacks per message, preserving per-session ordering.
//! Each message is routed with the token of the processor event, so handlers
//! observe processor shutdown as well as host shutdown.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::lifecycle::MessagePumpState;
use super::message_pump::{MessagePump, MessagePumpStatsSnapshot, PumpCore};
use crate::config::ServiceBusMessagePumpOptions;
use crate::error::{BusrouteError, BusrouteResult};
use crate::logging::log_pump_operation;
use crate::messaging::{
    MessageProcessingError, MessageProcessingResult, ProcessErrorEventArgs,
    ProcessSessionMessageEventArgs, ServiceBusSessionProcessor, ServiceBusSessionProcessorFactory,
    SessionProcessorHandler,
};
use crate::servicebus::{ServiceBusEntityType, ServiceBusMessageContext, ServiceBusMessageRouter};

/// Message pump processing a session-enabled queue or subscription
#[derive(Debug, Clone)]
pub struct ServiceBusSessionMessagePump {
    inner: Arc<SessionPumpInner>,
}

struct SessionPumpInner {
    core: PumpCore,
    options: ServiceBusMessagePumpOptions,
    entity_type: Option<ServiceBusEntityType>,
    processor_factory: Arc<dyn ServiceBusSessionProcessorFactory>,
    processor: RwLock<Option<Arc<dyn ServiceBusSessionProcessor>>>,
    shutdown_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionPumpInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusSessionMessagePump")
            .field("job_id", &self.core.job_id)
            .field("state", &self.core.state.get())
            .field("session", &self.options.session)
            .finish()
    }
}

/// Processor callbacks; weak so a dropped pump does not outlive its processor
struct SessionCallbacks {
    pump: Weak<SessionPumpInner>,
}

impl ServiceBusSessionMessagePump {
    pub fn new(
        router: ServiceBusMessageRouter,
        processor_factory: Arc<dyn ServiceBusSessionProcessorFactory>,
        options: ServiceBusMessagePumpOptions,
        host_cancellation: CancellationToken,
    ) -> BusrouteResult<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(SessionPumpInner {
                core: PumpCore::new(options.job_id.clone(), router, host_cancellation),
                options,
                entity_type: None,
                processor_factory,
                processor: RwLock::new(None),
                shutdown_watcher: Mutex::new(None),
            }),
        })
    }

    /// Set the entity type instead of inferring it from the entity path.
    ///
    /// Only effective before the pump is shared.
    pub fn with_entity_type(mut self, entity_type: ServiceBusEntityType) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.entity_type = Some(entity_type);
        }
        self
    }

    pub fn options(&self) -> &ServiceBusMessagePumpOptions {
        &self.inner.options
    }

    pub fn stats(&self) -> MessagePumpStatsSnapshot {
        self.inner.core.stats.snapshot()
    }
}

impl SessionPumpInner {
    async fn process_session_message(&self, args: ProcessSessionMessageEventArgs) -> Option<MessageProcessingResult> {
        let Some(message) = args.message.as_ref() else {
            warn!(
                job_id = %self.core.job_id,
                entity_path = %args.entity_path,
                "Session processor delivered an event without a message, ignoring"
            );
            return None;
        };

        let entity_type = self
            .entity_type
            .unwrap_or_else(|| ServiceBusEntityType::from_entity_path(&args.entity_path));

        let context = match ServiceBusMessageContext::from_session(
            self.core.job_id.clone(),
            entity_type,
            &args,
            message,
        ) {
            Ok(context) => context,
            Err(e) => {
                warn!(
                    job_id = %self.core.job_id,
                    message_id = %message.message_id,
                    session_id = %args.session_id,
                    error = %e,
                    "Could not create session message context, abandoning message"
                );
                if let Err(e) = args.actions.abandon_message(message, None).await {
                    warn!(job_id = %self.core.job_id, error = %e, "Failed to abandon session message");
                }
                let result = MessageProcessingResult::failure(
                    &message.message_id,
                    MessageProcessingError::ProcessingInterrupted,
                    format!("message context could not be created: {e}"),
                );
                self.core.stats.record(&result);
                return Some(result);
            }
        };

        debug!(
            job_id = %self.core.job_id,
            message_id = %message.message_id,
            session_id = %args.session_id,
            "Processing session message"
        );
        self.core.stats.messages_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Some(self.core.route_message(message, &context, &args.cancellation).await)
    }

    fn process_error(&self, args: ProcessErrorEventArgs) {
        let Some(error) = args.error else {
            warn!(
                job_id = %self.core.job_id,
                entity_path = %args.entity_path,
                "Session processor delivered an error event without an error, ignoring"
            );
            return;
        };

        self.core
            .stats
            .receive_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        error!(
            job_id = %self.core.job_id,
            entity_path = %args.entity_path,
            error_source = ?args.error_source,
            error = %error,
            "Session processor failed"
        );
    }

    async fn stop_processor(&self) {
        let processor = self.processor.write().take();
        if let Some(processor) = processor {
            if let Err(e) = processor.stop_processing().await {
                warn!(job_id = %self.core.job_id, error = %e, "Failed to stop session processor");
            }
            if let Err(e) = processor.close().await {
                warn!(job_id = %self.core.job_id, error = %e, "Failed to close session processor");
            }
        }
    }
}

#[async_trait]
impl SessionProcessorHandler for SessionCallbacks {
    async fn process_message(&self, args: ProcessSessionMessageEventArgs) {
        if let Some(pump) = self.pump.upgrade() {
            pump.process_session_message(args).await;
        }
    }

    async fn process_error(&self, args: ProcessErrorEventArgs) {
        if let Some(pump) = self.pump.upgrade() {
            pump.process_error(args);
        }
    }
}

#[async_trait]
impl MessagePump for ServiceBusSessionMessagePump {
    fn job_id(&self) -> &str {
        &self.inner.core.job_id
    }

    fn state(&self) -> MessagePumpState {
        self.inner.core.state.get()
    }

    fn is_host_shutting_down(&self) -> bool {
        self.inner.core.is_host_shutting_down()
    }

    async fn start(&self) -> BusrouteResult<()> {
        let inner = &self.inner;
        let current = inner.core.state.get();
        if !current.can_start() || inner.core.host_cancellation().is_cancelled() {
            return Err(BusrouteError::InvalidState(format!(
                "session message pump '{}' cannot start while {current}",
                inner.core.job_id
            )));
        }
        if !inner.core.state.transition(current, MessagePumpState::Starting) {
            return Err(BusrouteError::InvalidState(format!(
                "session message pump '{}' is already starting",
                inner.core.job_id
            )));
        }

        let processor = match inner
            .processor_factory
            .create_processor(&inner.options.session, inner.options.prefetch_count)
            .await
        {
            Ok(processor) => processor,
            Err(e) => {
                inner.core.state.transition(MessagePumpState::Starting, MessagePumpState::Stopped);
                log_pump_operation("start", &inner.core.job_id, None, "failed", Some(&e.to_string()));
                return Err(e.into());
            }
        };

        let callbacks = Arc::new(SessionCallbacks {
            pump: Arc::downgrade(inner),
        });
        if let Err(e) = processor.start_processing(callbacks).await {
            inner.core.state.transition(MessagePumpState::Starting, MessagePumpState::Stopped);
            log_pump_operation(
                "start",
                &inner.core.job_id,
                Some(processor.entity_path()),
                "failed",
                Some(&e.to_string()),
            );
            if let Err(e) = processor.close().await {
                warn!(job_id = %inner.core.job_id, error = %e, "Failed to close session processor");
            }
            return Err(e.into());
        }

        let entity_path = processor.entity_path().to_string();
        *inner.processor.write() = Some(processor);
        let token = inner.core.renew_pump_cancellation();

        // Held until the watcher is stored so a concurrent stop awaits it
        let mut shutdown_watcher = inner.shutdown_watcher.lock().await;
        if !inner.core.state.transition(MessagePumpState::Starting, MessagePumpState::Running) {
            drop(shutdown_watcher);
            inner.stop_processor().await;
            log_pump_operation("start", &inner.core.job_id, Some(&entity_path), "cancelled", Some("stopped while starting"));
            return Err(BusrouteError::InvalidState(format!(
                "session message pump '{}' was stopped while starting",
                inner.core.job_id
            )));
        }

        // Host shutdown stops the processor without a stop call
        let watched = Arc::clone(inner);
        let watcher = tokio::spawn(async move {
            token.cancelled().await;
            if watched.core.host_cancellation().is_cancelled()
                && watched
                    .core
                    .state
                    .transition(MessagePumpState::Running, MessagePumpState::ShuttingDown)
            {
                watched.stop_processor().await;
                watched.core.state.set(MessagePumpState::Stopped);
                log_pump_operation("stop", &watched.core.job_id, None, "host shutdown", None);
            }
        });
        *shutdown_watcher = Some(watcher);
        drop(shutdown_watcher);

        log_pump_operation("start", &inner.core.job_id, Some(&entity_path), "running", None);
        Ok(())
    }

    async fn stop(&self) -> BusrouteResult<()> {
        let inner = &self.inner;
        let current = inner.core.state.get();
        if !matches!(current, MessagePumpState::NotStarted | MessagePumpState::Stopped) {
            inner.core.state.set(MessagePumpState::ShuttingDown);
            inner.core.pump_cancellation().cancel();
            inner.stop_processor().await;
        }

        let watcher = inner.shutdown_watcher.lock().await.take();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        if current != MessagePumpState::NotStarted {
            inner.core.state.set(MessagePumpState::Stopped);
        }
        log_pump_operation("stop", &inner.core.job_id, None, "stopped", None);
        Ok(())
    }
}
