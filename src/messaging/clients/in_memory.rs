//! # In-Memory Service Bus Implementations
//!
//! In-memory receiver and session processor for testing and local runs.
//! Messages move between an active queue, a locked set (received but not yet
//! settled), a completed log and a dead-letter queue, mirroring peek-lock
//! semantics.
//!
//! ## Usage
//!
//! ```rust
//! use busroute::messaging::clients::InMemoryServiceBusReceiver;
//! use busroute::messaging::{ServiceBusReceivedMessage, ServiceBusReceiver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let receiver = InMemoryServiceBusReceiver::new("sb://local", "orders");
//! receiver.send_message(ServiceBusReceivedMessage::new("msg-1", r#"{"id":1}"#));
//! let batch = receiver.receive_messages(10, None).await?;
//! receiver.complete_message(&batch[0]).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceBusSessionOptions;
use crate::constants::IN_MEMORY_DEFAULT_MAX_WAIT;
use crate::messaging::receiver::{
    MessagingResult, ProcessErrorEventArgs, ProcessSessionMessageEventArgs, ServiceBusErrorSource,
    ServiceBusReceiver, ServiceBusReceiverFactory, ServiceBusSessionProcessor,
    ServiceBusSessionProcessorFactory, SessionMessageActions, SessionProcessorHandler,
};
use crate::messaging::{MessagingError, ServiceBusReceivedMessage};

/// Entity storage shared by in-memory receivers and session processors
#[derive(Debug, Default)]
struct EntityState {
    active: VecDeque<ServiceBusReceivedMessage>,
    locked: HashMap<String, ServiceBusReceivedMessage>,
    completed: Vec<ServiceBusReceivedMessage>,
    dead_letters: Vec<ServiceBusReceivedMessage>,
    pending_receive_failures: VecDeque<MessagingError>,
    next_sequence_number: i64,
}

/// In-memory queue or subscription with peek-lock semantics
#[derive(Debug)]
pub struct InMemoryEntity {
    fully_qualified_namespace: String,
    entity_path: String,
    state: Mutex<EntityState>,
    available: Notify,
    abandoned_count: AtomicU64,
}

impl InMemoryEntity {
    pub fn new(fully_qualified_namespace: impl Into<String>, entity_path: impl Into<String>) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            entity_path: entity_path.into(),
            state: Mutex::new(EntityState::default()),
            available: Notify::new(),
            abandoned_count: AtomicU64::new(0),
        }
    }

    pub fn fully_qualified_namespace(&self) -> &str {
        &self.fully_qualified_namespace
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    /// Enqueue a message, assigning the next sequence number
    pub fn send_message(&self, mut message: ServiceBusReceivedMessage) {
        {
            let mut state = self.state.lock();
            state.next_sequence_number += 1;
            message.sequence_number = state.next_sequence_number;
            state.active.push_back(message);
        }
        self.available.notify_one();
    }

    /// Make the next receive call fail with `error`
    pub fn fail_next_receive(&self, error: MessagingError) {
        self.state.lock().pending_receive_failures.push_back(error);
        self.available.notify_one();
    }

    fn take_available(&self, max_messages: usize) -> MessagingResult<Vec<ServiceBusReceivedMessage>> {
        let mut state = self.state.lock();
        if let Some(error) = state.pending_receive_failures.pop_front() {
            return Err(error);
        }

        let count = max_messages.min(state.active.len());
        let mut received = Vec::with_capacity(count);
        for mut message in state.active.drain(..count).collect::<Vec<_>>() {
            message.lock_token = Uuid::new_v4().to_string();
            message.delivery_count += 1;
            state.locked.insert(message.lock_token.clone(), message.clone());
            received.push(message);
        }
        Ok(received)
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait_time: Option<Duration>,
    ) -> MessagingResult<Vec<ServiceBusReceivedMessage>> {
        let wait = max_wait_time.unwrap_or(IN_MEMORY_DEFAULT_MAX_WAIT);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let received = self.take_available(max_messages.max(1))?;
            if !received.is_empty() {
                return Ok(received);
            }

            let notified = self.available.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn unlock(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<ServiceBusReceivedMessage> {
        self.state
            .lock()
            .locked
            .remove(&message.lock_token)
            .ok_or_else(|| MessagingError::message_lock_lost(&message.lock_token))
    }

    fn complete(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<()> {
        let locked = self.unlock(message)?;
        debug!(message_id = %locked.message_id, entity_path = %self.entity_path, "Completed in-memory message");
        self.state.lock().completed.push(locked);
        Ok(())
    }

    fn abandon(
        &self,
        message: &ServiceBusReceivedMessage,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        let mut locked = self.unlock(message)?;
        if let Some(properties) = properties_to_modify {
            locked.application_properties.extend(properties);
        }
        debug!(message_id = %locked.message_id, entity_path = %self.entity_path, "Abandoned in-memory message");
        self.state.lock().active.push_back(locked);
        self.abandoned_count.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        Ok(())
    }

    fn dead_letter(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        let mut locked = self.unlock(message)?;
        if let Some(properties) = properties_to_modify {
            locked.application_properties.extend(properties);
        }
        locked.dead_letter_reason = Some(reason.to_string());
        locked.dead_letter_error_description = description.map(str::to_string);
        warn!(
            message_id = %locked.message_id,
            entity_path = %self.entity_path,
            reason = %reason,
            "Dead-lettered in-memory message"
        );
        self.state.lock().dead_letters.push(locked);
        Ok(())
    }

    pub fn active_message_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn locked_message_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    pub fn completed_messages(&self) -> Vec<ServiceBusReceivedMessage> {
        self.state.lock().completed.clone()
    }

    pub fn dead_lettered_messages(&self) -> Vec<ServiceBusReceivedMessage> {
        self.state.lock().dead_letters.clone()
    }

    pub fn abandoned_count(&self) -> u64 {
        self.abandoned_count.load(Ordering::Relaxed)
    }
}

/// In-memory non-session receiver
#[derive(Debug, Clone)]
pub struct InMemoryServiceBusReceiver {
    entity: Arc<InMemoryEntity>,
    closed: Arc<AtomicBool>,
}

impl InMemoryServiceBusReceiver {
    pub fn new(fully_qualified_namespace: impl Into<String>, entity_path: impl Into<String>) -> Self {
        Self::for_entity(Arc::new(InMemoryEntity::new(fully_qualified_namespace, entity_path)))
    }

    /// Receiver over an existing entity (several receivers may share one)
    pub fn for_entity(entity: Arc<InMemoryEntity>) -> Self {
        Self {
            entity,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn entity(&self) -> &Arc<InMemoryEntity> {
        &self.entity
    }

    pub fn send_message(&self, message: ServiceBusReceivedMessage) {
        self.entity.send_message(message);
    }

    pub fn completed_messages(&self) -> Vec<ServiceBusReceivedMessage> {
        self.entity.completed_messages()
    }

    pub fn dead_lettered_messages(&self) -> Vec<ServiceBusReceivedMessage> {
        self.entity.dead_lettered_messages()
    }

    pub fn abandoned_count(&self) -> u64 {
        self.entity.abandoned_count()
    }

    fn ensure_open(&self) -> MessagingResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::receiver_closed(self.entity.entity_path()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceBusReceiver for InMemoryServiceBusReceiver {
    fn fully_qualified_namespace(&self) -> &str {
        self.entity.fully_qualified_namespace()
    }

    fn entity_path(&self) -> &str {
        self.entity.entity_path()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait_time: Option<Duration>,
    ) -> MessagingResult<Vec<ServiceBusReceivedMessage>> {
        self.ensure_open()?;
        self.entity.receive(max_messages, max_wait_time).await
    }

    async fn receive_message(
        &self,
        max_wait_time: Option<Duration>,
    ) -> MessagingResult<Option<ServiceBusReceivedMessage>> {
        self.ensure_open()?;
        Ok(self.entity.receive(1, max_wait_time).await?.into_iter().next())
    }

    async fn complete_message(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<()> {
        self.ensure_open()?;
        self.entity.complete(message)
    }

    async fn abandon_message(
        &self,
        message: &ServiceBusReceivedMessage,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.ensure_open()?;
        self.entity.abandon(message, properties_to_modify)
    }

    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.ensure_open()?;
        self.entity
            .dead_letter(message, reason, description, properties_to_modify)
    }

    async fn close(&self) -> MessagingResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Hands out fresh receivers over one shared entity
#[derive(Debug, Clone)]
pub struct InMemoryReceiverFactory {
    entity: Arc<InMemoryEntity>,
    created: Arc<AtomicU64>,
}

impl InMemoryReceiverFactory {
    pub fn new(entity: Arc<InMemoryEntity>) -> Self {
        Self {
            entity,
            created: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of receivers created so far
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServiceBusReceiverFactory for InMemoryReceiverFactory {
    async fn create_receiver(&self, prefetch_count: u32) -> MessagingResult<Arc<dyn ServiceBusReceiver>> {
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            entity_path = %self.entity.entity_path(),
            prefetch_count = prefetch_count,
            "Creating in-memory receiver"
        );
        Ok(Arc::new(InMemoryServiceBusReceiver::for_entity(self.entity.clone())))
    }
}

/// Session settlement actions backed by the in-memory entity
#[derive(Debug)]
struct InMemorySessionActions {
    entity: Arc<InMemoryEntity>,
}

#[async_trait]
impl SessionMessageActions for InMemorySessionActions {
    async fn complete_message(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<()> {
        self.entity.complete(message)
    }

    async fn abandon_message(
        &self,
        message: &ServiceBusReceivedMessage,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.entity.abandon(message, properties_to_modify)
    }

    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.entity
            .dead_letter(message, reason, description, properties_to_modify)
    }
}

/// Events the in-memory session processor can be asked to deliver verbatim
#[derive(Debug, Clone)]
enum InjectedEvent {
    EmptyMessage,
    Error(Option<MessagingError>),
}

/// In-memory session processor
///
/// Delivers messages one at a time in arrival order, which trivially preserves
/// per-session ordering.
#[derive(Debug)]
pub struct InMemorySessionProcessor {
    entity: Arc<InMemoryEntity>,
    injected: Arc<Mutex<VecDeque<InjectedEvent>>>,
    cancellation: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    processing: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl InMemorySessionProcessor {
    pub fn new(entity: Arc<InMemoryEntity>) -> Self {
        Self {
            entity,
            injected: Arc::new(Mutex::new(VecDeque::new())),
            cancellation: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
            processing: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a message event without a message
    pub fn inject_empty_message_event(&self) {
        self.injected.lock().push_back(InjectedEvent::EmptyMessage);
        self.entity.available.notify_one();
    }

    /// Deliver an error event (`None` delivers an empty error event)
    pub fn inject_error(&self, error: Option<MessagingError>) {
        self.injected.lock().push_back(InjectedEvent::Error(error));
        self.entity.available.notify_one();
    }

    async fn run(
        entity: Arc<InMemoryEntity>,
        injected: Arc<Mutex<VecDeque<InjectedEvent>>>,
        handler: Arc<dyn SessionProcessorHandler>,
        cancellation: CancellationToken,
    ) {
        let actions: Arc<dyn SessionMessageActions> = Arc::new(InMemorySessionActions {
            entity: entity.clone(),
        });

        while !cancellation.is_cancelled() {
            let next_injected = injected.lock().pop_front();
            if let Some(event) = next_injected {
                match event {
                    InjectedEvent::EmptyMessage => {
                        handler
                            .process_message(ProcessSessionMessageEventArgs {
                                message: None,
                                session_id: String::new(),
                                fully_qualified_namespace: entity.fully_qualified_namespace().to_string(),
                                entity_path: entity.entity_path().to_string(),
                                actions: actions.clone(),
                                cancellation: cancellation.clone(),
                            })
                            .await;
                    }
                    InjectedEvent::Error(error) => {
                        handler
                            .process_error(ProcessErrorEventArgs {
                                error,
                                error_source: ServiceBusErrorSource::Receive,
                                fully_qualified_namespace: entity.fully_qualified_namespace().to_string(),
                                entity_path: entity.entity_path().to_string(),
                            })
                            .await;
                    }
                }
                continue;
            }

            let notified = entity.available.notified();
            match entity.take_available(1) {
                Ok(messages) if messages.is_empty() => {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = notified => continue,
                    }
                }
                Ok(messages) => {
                    for message in messages {
                        let session_id = message.session_id.clone().unwrap_or_default();
                        handler
                            .process_message(ProcessSessionMessageEventArgs {
                                message: Some(message),
                                session_id,
                                fully_qualified_namespace: entity.fully_qualified_namespace().to_string(),
                                entity_path: entity.entity_path().to_string(),
                                actions: actions.clone(),
                                cancellation: cancellation.clone(),
                            })
                            .await;
                    }
                }
                Err(error) => {
                    handler
                        .process_error(ProcessErrorEventArgs {
                            error: Some(error),
                            error_source: ServiceBusErrorSource::Receive,
                            fully_qualified_namespace: entity.fully_qualified_namespace().to_string(),
                            entity_path: entity.entity_path().to_string(),
                        })
                        .await;
                }
            }
        }

        debug!(entity_path = %entity.entity_path(), "In-memory session processor loop exited");
    }
}

#[async_trait]
impl ServiceBusSessionProcessor for InMemorySessionProcessor {
    fn fully_qualified_namespace(&self) -> &str {
        self.entity.fully_qualified_namespace()
    }

    fn entity_path(&self) -> &str {
        self.entity.entity_path()
    }

    fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    async fn start_processing(&self, handler: Arc<dyn SessionProcessorHandler>) -> MessagingResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::receiver_closed(self.entity.entity_path()));
        }
        if self.processing.swap(true, Ordering::AcqRel) {
            return Err(MessagingError::session_processor("processor is already running"));
        }

        let cancellation = CancellationToken::new();
        *self.cancellation.lock() = cancellation.clone();

        let handle = tokio::spawn(Self::run(
            self.entity.clone(),
            self.injected.clone(),
            handler,
            cancellation,
        ));
        *self.task.lock() = Some(handle);

        info!(entity_path = %self.entity.entity_path(), "In-memory session processor started");
        Ok(())
    }

    async fn stop_processing(&self) -> MessagingResult<()> {
        self.cancellation.lock().cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "In-memory session processor task ended abnormally");
            }
        }
        self.processing.store(false, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        self.stop_processing().await?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Hands out in-memory session processors over one shared entity
#[derive(Debug, Clone)]
pub struct InMemorySessionProcessorFactory {
    entity: Arc<InMemoryEntity>,
    last_processor: Arc<Mutex<Option<Arc<InMemorySessionProcessor>>>>,
}

impl InMemorySessionProcessorFactory {
    pub fn new(entity: Arc<InMemoryEntity>) -> Self {
        Self {
            entity,
            last_processor: Arc::new(Mutex::new(None)),
        }
    }

    /// The most recently created processor, for injecting events in tests
    pub fn last_processor(&self) -> Option<Arc<InMemorySessionProcessor>> {
        self.last_processor.lock().clone()
    }
}

#[async_trait]
impl ServiceBusSessionProcessorFactory for InMemorySessionProcessorFactory {
    async fn create_processor(
        &self,
        options: &ServiceBusSessionOptions,
        prefetch_count: u32,
    ) -> MessagingResult<Arc<dyn ServiceBusSessionProcessor>> {
        debug!(
            entity_path = %self.entity.entity_path(),
            max_concurrent_sessions = options.max_concurrent_sessions,
            max_concurrent_calls_per_session = options.max_concurrent_calls_per_session,
            prefetch_count = prefetch_count,
            "Creating in-memory session processor"
        );
        let processor = Arc::new(InMemorySessionProcessor::new(self.entity.clone()));
        *self.last_processor.lock() = Some(processor.clone());
        Ok(processor)
    }
}
