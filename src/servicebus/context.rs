//! # Service Bus Message Context
//!
//! Context of a message received from a Service Bus queue or topic
//! subscription. Besides the general [`MessageContext`] it carries the entity
//! the message came from, broker system properties, and an optional
//! settlement strategy. Handlers settle their message through the context;
//! a context built without settlement (for instance by a serverless host that
//! settles itself) reports [`MessagingError::SettlementUnavailable`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BusrouteError, BusrouteResult};
use crate::messaging::receiver::{MessagingResult, ProcessSessionMessageEventArgs};
use crate::messaging::{
    HandlerContext, MessageContext, MessageSettlement, MessagingError, ReceiverSettlement,
    RoutingContext, ServiceBusReceivedMessage, ServiceBusReceiver, SessionSettlement,
};

const SUBSCRIPTIONS_SEGMENT: &str = "subscriptions";

/// Kind of Service Bus entity a message was received from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceBusEntityType {
    Queue,
    Topic,
}

impl ServiceBusEntityType {
    /// Topic when the path names a subscription, queue otherwise
    pub fn from_entity_path(entity_path: &str) -> Self {
        if subscription_name(entity_path).is_some() {
            Self::Topic
        } else {
            Self::Queue
        }
    }
}

impl fmt::Display for ServiceBusEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "Queue"),
            Self::Topic => write!(f, "Topic"),
        }
    }
}

/// Subscription segment of `<topic>/Subscriptions/<subscription>`
fn subscription_name(entity_path: &str) -> Option<&str> {
    let mut segments = entity_path.split('/');
    let _topic = segments.next()?;
    let marker = segments.next()?;
    let subscription = segments.next()?;

    (marker.eq_ignore_ascii_case(SUBSCRIPTIONS_SEGMENT) && !subscription.is_empty())
        .then_some(subscription)
}

/// Broker-assigned properties of the received message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBusSystemProperties {
    pub sequence_number: i64,
    pub enqueued_time: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
}

impl From<&ServiceBusReceivedMessage> for ServiceBusSystemProperties {
    fn from(message: &ServiceBusReceivedMessage) -> Self {
        Self {
            sequence_number: message.sequence_number,
            enqueued_time: message.enqueued_time,
            correlation_id: message.correlation_id.clone(),
            content_type: message.content_type.clone(),
            subject: message.subject.clone(),
        }
    }
}

/// Context of a message received from Service Bus
#[derive(Clone)]
pub struct ServiceBusMessageContext {
    base: MessageContext,
    fully_qualified_namespace: String,
    entity_path: String,
    entity_type: ServiceBusEntityType,
    subscription_name: Option<String>,
    lock_token: String,
    delivery_count: u32,
    session_id: Option<String>,
    system_properties: ServiceBusSystemProperties,
    settlement: Option<Arc<dyn MessageSettlement>>,
}

impl ServiceBusMessageContext {
    /// Create a context without settlement capability
    pub fn new(
        job_id: impl Into<String>,
        fully_qualified_namespace: impl Into<String>,
        entity_type: ServiceBusEntityType,
        entity_path: impl Into<String>,
        message: &ServiceBusReceivedMessage,
    ) -> BusrouteResult<Self> {
        let entity_path = entity_path.into();
        if entity_path.trim().is_empty() {
            return Err(BusrouteError::invalid_argument(
                "entity path is required to create a Service Bus message context",
            ));
        }

        let subscription_name = subscription_name(&entity_path).map(str::to_string);
        if entity_type == ServiceBusEntityType::Queue && subscription_name.is_some() {
            return Err(BusrouteError::invalid_argument(format!(
                "queue entity path '{entity_path}' cannot name a subscription"
            )));
        }

        let base = MessageContext::new(
            message.message_id.clone(),
            job_id,
            message.application_properties.clone(),
        )?;

        Ok(Self {
            base,
            fully_qualified_namespace: fully_qualified_namespace.into(),
            entity_path,
            entity_type,
            subscription_name,
            lock_token: message.lock_token.clone(),
            delivery_count: message.delivery_count,
            session_id: message.session_id.clone(),
            system_properties: ServiceBusSystemProperties::from(message),
            settlement: None,
        })
    }

    /// Context settling through the receiver that received `message`
    pub fn from_receiver(
        job_id: impl Into<String>,
        entity_type: ServiceBusEntityType,
        receiver: Arc<dyn ServiceBusReceiver>,
        message: &ServiceBusReceivedMessage,
    ) -> BusrouteResult<Self> {
        let context = Self::new(
            job_id,
            receiver.fully_qualified_namespace(),
            entity_type,
            receiver.entity_path(),
            message,
        )?;
        let settlement = ReceiverSettlement::new(receiver, message.clone());
        Ok(context.with_settlement(Arc::new(settlement)))
    }

    /// Context settling through the actions of a session message event
    pub fn from_session(
        job_id: impl Into<String>,
        entity_type: ServiceBusEntityType,
        args: &ProcessSessionMessageEventArgs,
        message: &ServiceBusReceivedMessage,
    ) -> BusrouteResult<Self> {
        let context = Self::new(
            job_id,
            args.fully_qualified_namespace.clone(),
            entity_type,
            args.entity_path.clone(),
            message,
        )?;
        let settlement = SessionSettlement::new(Arc::clone(&args.actions), message.clone());
        Ok(context.with_settlement(Arc::new(settlement)))
    }

    pub fn with_settlement(mut self, settlement: Arc<dyn MessageSettlement>) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn message_id(&self) -> &str {
        self.base.message_id()
    }

    pub fn job_id(&self) -> &str {
        self.base.job_id()
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        self.base.properties()
    }

    pub fn fully_qualified_namespace(&self) -> &str {
        &self.fully_qualified_namespace
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn entity_type(&self) -> ServiceBusEntityType {
        self.entity_type
    }

    /// Set only for topic subscriptions
    pub fn subscription_name(&self) -> Option<&str> {
        self.subscription_name.as_deref()
    }

    pub fn lock_token(&self) -> &str {
        &self.lock_token
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn system_properties(&self) -> &ServiceBusSystemProperties {
        &self.system_properties
    }

    pub fn has_settlement(&self) -> bool {
        self.settlement.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.settlement
            .as_ref()
            .is_some_and(|settlement| settlement.is_settled())
    }

    pub async fn complete_message(&self) -> MessagingResult<()> {
        self.settlement()?.complete().await
    }

    pub async fn abandon_message(
        &self,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.settlement()?.abandon(properties_to_modify).await
    }

    pub async fn dead_letter_message(
        &self,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        self.settlement()?
            .dead_letter(reason, description, properties_to_modify)
            .await
    }

    fn settlement(&self) -> MessagingResult<&Arc<dyn MessageSettlement>> {
        self.settlement
            .as_ref()
            .ok_or_else(|| MessagingError::settlement_unavailable(self.message_id()))
    }
}

impl fmt::Debug for ServiceBusMessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusMessageContext")
            .field("message_id", &self.message_id())
            .field("job_id", &self.job_id())
            .field("entity_path", &self.entity_path)
            .field("entity_type", &self.entity_type)
            .field("subscription_name", &self.subscription_name)
            .field("delivery_count", &self.delivery_count)
            .field("has_settlement", &self.has_settlement())
            .finish()
    }
}

impl RoutingContext for ServiceBusMessageContext {
    fn message_context(&self) -> &MessageContext {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HandlerContext for ServiceBusMessageContext {
    fn from_routing_context(context: &dyn RoutingContext) -> Option<&Self> {
        context.as_any().downcast_ref::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::clients::InMemoryServiceBusReceiver;

    fn message() -> ServiceBusReceivedMessage {
        ServiceBusReceivedMessage::new("msg-1", b"{}".to_vec())
            .with_application_property("tenant", "contoso")
    }

    #[test]
    fn test_subscription_parsing() {
        assert_eq!(subscription_name("orders/Subscriptions/audit"), Some("audit"));
        assert_eq!(subscription_name("orders/subscriptions/audit"), Some("audit"));
        assert_eq!(subscription_name("orders"), None);
        assert_eq!(subscription_name("orders/Subscriptions/"), None);
        assert_eq!(
            ServiceBusEntityType::from_entity_path("orders/Subscriptions/audit"),
            ServiceBusEntityType::Topic
        );
        assert_eq!(ServiceBusEntityType::from_entity_path("orders"), ServiceBusEntityType::Queue);
    }

    #[test]
    fn test_context_validation() {
        let message = message();
        assert!(ServiceBusMessageContext::new("job", "ns", ServiceBusEntityType::Queue, "", &message).is_err());
        assert!(ServiceBusMessageContext::new(
            "job",
            "ns",
            ServiceBusEntityType::Queue,
            "orders/Subscriptions/audit",
            &message
        )
        .is_err());

        let context = ServiceBusMessageContext::new(
            "job",
            "ns",
            ServiceBusEntityType::Topic,
            "orders/Subscriptions/audit",
            &message,
        )
        .unwrap();
        assert_eq!(context.subscription_name(), Some("audit"));
        assert_eq!(context.message_id(), "msg-1");
        assert_eq!(context.properties()["tenant"], "contoso");

        let context =
            ServiceBusMessageContext::new("job", "ns", ServiceBusEntityType::Topic, "orders", &message).unwrap();
        assert_eq!(context.subscription_name(), None);
    }

    #[tokio::test]
    async fn test_settlement_unavailable_without_strategy() {
        let context =
            ServiceBusMessageContext::new("job", "ns", ServiceBusEntityType::Queue, "orders", &message()).unwrap();

        assert!(!context.has_settlement());
        assert!(matches!(
            context.complete_message().await,
            Err(MessagingError::SettlementUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_settles_through_receiver() {
        let receiver = Arc::new(InMemoryServiceBusReceiver::new("ns", "orders"));
        receiver.send_message(message());
        let received = receiver.receive_message(None).await.unwrap().unwrap();

        let context = ServiceBusMessageContext::from_receiver(
            "job",
            ServiceBusEntityType::Queue,
            receiver.clone(),
            &received,
        )
        .unwrap();

        assert_eq!(context.delivery_count(), 1);
        context.complete_message().await.unwrap();
        assert!(context.is_settled());
        assert_eq!(receiver.completed_messages().len(), 1);
    }

    #[test]
    fn test_narrowing_from_routing_context() {
        let context =
            ServiceBusMessageContext::new("job", "ns", ServiceBusEntityType::Queue, "orders", &message()).unwrap();
        let routed: &dyn RoutingContext = &context;
        assert!(ServiceBusMessageContext::from_routing_context(routed).is_some());

        let general = MessageContext::new("msg-1", "job", HashMap::new()).unwrap();
        let routed: &dyn RoutingContext = &general;
        assert!(ServiceBusMessageContext::from_routing_context(routed).is_none());
    }
}
