//! # Broker Receiver Abstractions
//!
//! The shapes the pumps need from a Service Bus client: a non-session receiver
//! for the polling pump, and a session processor with callback registration for
//! the session pump. Concrete SDK bindings implement these traits; the
//! in-memory implementations in [`crate::messaging::clients`] back the tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceBusSessionOptions;
use crate::messaging::{MessagingError, ServiceBusReceivedMessage};

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Non-session receiver bound to a single queue or topic subscription
#[async_trait]
pub trait ServiceBusReceiver: Send + Sync + std::fmt::Debug {
    /// Fully qualified namespace the receiver is connected to
    fn fully_qualified_namespace(&self) -> &str;

    /// Entity path (queue name, or `<topic>/Subscriptions/<subscription>`)
    fn entity_path(&self) -> &str;

    /// Whether the receiver was closed
    fn is_closed(&self) -> bool;

    /// Receive up to `max_messages`, waiting at most `max_wait_time` when the
    /// entity is empty. An empty vector means nothing arrived in time.
    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait_time: Option<Duration>,
    ) -> MessagingResult<Vec<ServiceBusReceivedMessage>>;

    /// Receive a single message
    async fn receive_message(
        &self,
        max_wait_time: Option<Duration>,
    ) -> MessagingResult<Option<ServiceBusReceivedMessage>>;

    /// Remove the message from the entity
    async fn complete_message(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<()>;

    /// Release the lock so the message is redelivered
    async fn abandon_message(
        &self,
        message: &ServiceBusReceivedMessage,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()>;

    /// Move the message to the dead-letter sub-queue
    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()>;

    /// Close the underlying link
    async fn close(&self) -> MessagingResult<()>;
}

/// Creates receivers for the polling pump (on start and restart)
#[async_trait]
pub trait ServiceBusReceiverFactory: Send + Sync {
    async fn create_receiver(&self, prefetch_count: u32) -> MessagingResult<Arc<dyn ServiceBusReceiver>>;
}

/// Settlement operations available on a session message event
#[async_trait]
pub trait SessionMessageActions: Send + Sync + std::fmt::Debug {
    async fn complete_message(&self, message: &ServiceBusReceivedMessage) -> MessagingResult<()>;

    async fn abandon_message(
        &self,
        message: &ServiceBusReceivedMessage,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()>;

    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()>;
}

/// Arguments of a session message callback
#[derive(Debug, Clone)]
pub struct ProcessSessionMessageEventArgs {
    /// The received message; `None` when the processor delivered an empty event
    pub message: Option<ServiceBusReceivedMessage>,
    pub session_id: String,
    pub fully_qualified_namespace: String,
    pub entity_path: String,
    pub actions: Arc<dyn SessionMessageActions>,
    pub cancellation: CancellationToken,
}

/// Where a session processor error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceBusErrorSource {
    Receive,
    Complete,
    Abandon,
    DeadLetter,
    AcceptSession,
    CloseSession,
    ProcessMessageCallback,
    Unknown,
}

/// Arguments of a session error callback
#[derive(Debug, Clone)]
pub struct ProcessErrorEventArgs {
    /// The error; `None` when the processor delivered an empty event
    pub error: Option<MessagingError>,
    pub error_source: ServiceBusErrorSource,
    pub fully_qualified_namespace: String,
    pub entity_path: String,
}

/// Callbacks a session processor invokes
#[async_trait]
pub trait SessionProcessorHandler: Send + Sync {
    async fn process_message(&self, args: ProcessSessionMessageEventArgs);

    async fn process_error(&self, args: ProcessErrorEventArgs);
}

/// Session processor owning its own receive loop
#[async_trait]
pub trait ServiceBusSessionProcessor: Send + Sync + std::fmt::Debug {
    fn fully_qualified_namespace(&self) -> &str;

    fn entity_path(&self) -> &str;

    fn is_processing(&self) -> bool;

    /// Register the callbacks and begin processing
    async fn start_processing(&self, handler: Arc<dyn SessionProcessorHandler>) -> MessagingResult<()>;

    /// Stop invoking callbacks; in-flight callbacks run to completion
    async fn stop_processing(&self) -> MessagingResult<()>;

    async fn close(&self) -> MessagingResult<()>;
}

/// Creates session processors for the session pump
#[async_trait]
pub trait ServiceBusSessionProcessorFactory: Send + Sync {
    async fn create_processor(
        &self,
        options: &ServiceBusSessionOptions,
        prefetch_count: u32,
    ) -> MessagingResult<Arc<dyn ServiceBusSessionProcessor>>;
}
