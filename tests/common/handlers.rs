//! Recording handlers with explicit shared state

use async_trait::async_trait;
use busroute::messaging::{MessageContext, MessageCorrelationInfo, ServiceBusReceivedMessage};
use busroute::routing::{FallbackMessageHandler, MessageHandler};
use busroute::servicebus::{ServiceBusFallbackMessageHandler, ServiceBusMessageContext};
use busroute::HandlerError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::builders::{Order, Shipment};

/// Ordered record of handler invocations, shared across handlers
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|entry| entry.starts_with(prefix)).count()
    }
}

/// Records `<name>:<order_id>` and succeeds, or fails when `fail` is set
pub struct OrderHandler {
    pub name: &'static str,
    pub log: CallLog,
    pub fail: bool,
}

impl OrderHandler {
    pub fn succeeding(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fail: true,
        }
    }
}

#[async_trait]
impl MessageHandler<Order> for OrderHandler {
    async fn process_message(
        &self,
        message: Order,
        _context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!("{}:{}", self.name, message.order_id));
        if self.fail {
            return Err(format!("{} rejected order {}", self.name, message.order_id).into());
        }
        Ok(())
    }
}

pub struct ShipmentHandler {
    pub log: CallLog,
}

#[async_trait]
impl MessageHandler<Shipment> for ShipmentHandler {
    async fn process_message(
        &self,
        message: Shipment,
        _context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!("shipment:{}", message.shipment_id));
        Ok(())
    }
}

/// Fails until it was invoked `failures` times, then succeeds
pub struct FlakyOrderHandler {
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
    pub invoked_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl FlakyOrderHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
            invoked_at: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler<Order> for FlakyOrderHandler {
    async fn process_message(
        &self,
        _message: Order,
        _context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.invoked_at.lock().push(tokio::time::Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err("downstream dependency unavailable".into());
        }
        Ok(())
    }
}

/// Dead-letters the message itself through the Service Bus context
pub struct DeadLetteringOrderHandler;

#[async_trait]
impl MessageHandler<Order, ServiceBusMessageContext> for DeadLetteringOrderHandler {
    async fn process_message(
        &self,
        message: Order,
        context: &ServiceBusMessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        if message.amount == 0 {
            context
                .dead_letter_message("EmptyOrder", Some("order amount is zero"), None)
                .await?;
        }
        Ok(())
    }
}

/// Cancels the host token while processing, simulating host shutdown
pub struct ShutdownTriggeringHandler {
    pub host: CancellationToken,
    pub log: CallLog,
}

#[async_trait]
impl MessageHandler<Order> for ShutdownTriggeringHandler {
    async fn process_message(
        &self,
        message: Order,
        _context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!("shutdown:{}", message.order_id));
        self.host.cancel();
        Ok(())
    }
}

pub struct RecordingFallback {
    pub log: CallLog,
    pub fail: bool,
}

#[async_trait]
impl FallbackMessageHandler for RecordingFallback {
    async fn process_message(
        &self,
        body: &str,
        context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!("fallback:{}", context.message_id()));
        if self.fail {
            return Err(format!("fallback rejected body {body}").into());
        }
        Ok(())
    }
}

pub struct RecordingServiceBusFallback {
    pub log: CallLog,
}

#[async_trait]
impl ServiceBusFallbackMessageHandler for RecordingServiceBusFallback {
    async fn process_message(
        &self,
        message: &ServiceBusReceivedMessage,
        context: &ServiceBusMessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!(
            "servicebus-fallback:{}:{}",
            message.message_id,
            context.entity_path()
        ));
        Ok(())
    }
}
