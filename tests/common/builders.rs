//! Messages, contexts and pumps for integration tests

use async_trait::async_trait;
use busroute::config::{ServiceBusMessagePumpOptions, ServiceBusSessionOptions};
use busroute::messaging::clients::{
    InMemoryEntity, InMemoryReceiverFactory, InMemorySessionProcessorFactory,
};
use busroute::messaging::receiver::MessagingResult;
use busroute::messaging::{
    MessageContext, ServiceBusReceivedMessage, ServiceBusReceiver, ServiceBusReceiverFactory,
    ServiceBusSessionProcessor, ServiceBusSessionProcessorFactory,
};
use busroute::pump::ServiceBusReceiverMessagePump;
use busroute::routing::MessageHandlerCollection;
use busroute::servicebus::ServiceBusMessageRouter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "sb://busroute-tests.servicebus.windows.net";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: String,
    pub carrier: String,
}

pub fn order(order_id: &str, amount: u32) -> Order {
    Order {
        order_id: order_id.to_string(),
        amount,
    }
}

pub fn order_body(order_id: &str, amount: u32) -> String {
    serde_json::to_string(&order(order_id, amount)).unwrap()
}

pub fn order_message(message_id: &str, amount: u32) -> ServiceBusReceivedMessage {
    ServiceBusReceivedMessage::from_json(message_id, &order(message_id, amount)).unwrap()
}

pub fn shipment_message(message_id: &str) -> ServiceBusReceivedMessage {
    ServiceBusReceivedMessage::from_json(
        message_id,
        &Shipment {
            shipment_id: message_id.to_string(),
            carrier: "contoso".to_string(),
        },
    )
    .unwrap()
}

pub fn message_context(message_id: &str, job_id: &str) -> MessageContext {
    MessageContext::new(message_id, job_id, HashMap::new()).unwrap()
}

pub fn queue(entity_path: &str) -> Arc<InMemoryEntity> {
    Arc::new(InMemoryEntity::new(NAMESPACE, entity_path))
}

pub fn pump_options(job_id: &str, max_messages_per_batch: u32) -> ServiceBusMessagePumpOptions {
    ServiceBusMessagePumpOptions::default()
        .with_job_id(job_id)
        .with_max_messages_per_batch(max_messages_per_batch)
}

pub fn receiver_pump(
    entity: &Arc<InMemoryEntity>,
    handlers: MessageHandlerCollection,
    options: ServiceBusMessagePumpOptions,
    host: CancellationToken,
) -> ServiceBusReceiverMessagePump {
    let router = ServiceBusMessageRouter::new(handlers, options.routing.clone());
    ServiceBusReceiverMessagePump::builder(
        router,
        Arc::new(InMemoryReceiverFactory::new(Arc::clone(entity))),
        options,
    )
    .host_cancellation(host)
    .build()
    .unwrap()
}

/// Receiver factory that takes `delay` to open each receiver
pub struct SlowReceiverFactory {
    pub inner: InMemoryReceiverFactory,
    pub delay: Duration,
}

impl SlowReceiverFactory {
    pub fn new(entity: &Arc<InMemoryEntity>, delay: Duration) -> Self {
        Self {
            inner: InMemoryReceiverFactory::new(Arc::clone(entity)),
            delay,
        }
    }
}

#[async_trait]
impl ServiceBusReceiverFactory for SlowReceiverFactory {
    async fn create_receiver(&self, prefetch_count: u32) -> MessagingResult<Arc<dyn ServiceBusReceiver>> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_receiver(prefetch_count).await
    }
}

/// Session processor factory that takes `delay` to create each processor
pub struct SlowSessionProcessorFactory {
    pub inner: InMemorySessionProcessorFactory,
    pub delay: Duration,
}

impl SlowSessionProcessorFactory {
    pub fn new(entity: &Arc<InMemoryEntity>, delay: Duration) -> Self {
        Self {
            inner: InMemorySessionProcessorFactory::new(Arc::clone(entity)),
            delay,
        }
    }
}

#[async_trait]
impl ServiceBusSessionProcessorFactory for SlowSessionProcessorFactory {
    async fn create_processor(
        &self,
        options: &ServiceBusSessionOptions,
        prefetch_count: u32,
    ) -> MessagingResult<Arc<dyn ServiceBusSessionProcessor>> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_processor(options, prefetch_count).await
    }
}
