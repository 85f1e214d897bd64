//! # Message Settlement Strategies
//!
//! A message context owns a settlement strategy instead of a receiver: the
//! same complete/abandon/dead-letter calls resolve against a receiver for the
//! polling pump and against session event actions for the session pump.
//!
//! Every strategy settles its message at most once. Later attempts are no-ops,
//! so a handler that completes its own message does not race the router's
//! default settlement.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::messaging::receiver::{MessagingResult, ServiceBusReceiver, SessionMessageActions};
use crate::messaging::ServiceBusReceivedMessage;

/// Broker-level settlement capability for one received message
#[async_trait]
pub trait MessageSettlement: Send + Sync + std::fmt::Debug {
    async fn complete(&self) -> MessagingResult<()>;

    async fn abandon(&self, properties_to_modify: Option<HashMap<String, Value>>) -> MessagingResult<()>;

    async fn dead_letter(
        &self,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()>;

    /// Whether the message was already settled through this strategy
    fn is_settled(&self) -> bool;
}

/// Settle-once guard shared by the strategies
#[derive(Debug, Default)]
struct SettleOnce {
    settled: AtomicBool,
}

impl SettleOnce {
    /// Claim the settlement; returns false when already claimed
    fn claim(&self, message_id: &str, operation: &str) -> bool {
        let claimed = self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            debug!(
                message_id = %message_id,
                operation = %operation,
                "Message already settled, skipping settlement"
            );
        }
        claimed
    }

    /// Undo a claim after the broker call failed
    fn release(&self) {
        self.settled.store(false, Ordering::Release);
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    fn finish(&self, result: MessagingResult<()>) -> MessagingResult<()> {
        if result.is_err() {
            self.release();
        }
        result
    }
}

/// Settles through the non-session receiver that received the message
#[derive(Debug)]
pub struct ReceiverSettlement {
    receiver: Arc<dyn ServiceBusReceiver>,
    message: ServiceBusReceivedMessage,
    guard: SettleOnce,
}

impl ReceiverSettlement {
    pub fn new(receiver: Arc<dyn ServiceBusReceiver>, message: ServiceBusReceivedMessage) -> Self {
        Self {
            receiver,
            message,
            guard: SettleOnce::default(),
        }
    }
}

#[async_trait]
impl MessageSettlement for ReceiverSettlement {
    async fn complete(&self) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "complete") {
            return Ok(());
        }
        let result = self.receiver.complete_message(&self.message).await;
        self.guard.finish(result)
    }

    async fn abandon(&self, properties_to_modify: Option<HashMap<String, Value>>) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "abandon") {
            return Ok(());
        }
        let result = self
            .receiver
            .abandon_message(&self.message, properties_to_modify)
            .await;
        self.guard.finish(result)
    }

    async fn dead_letter(
        &self,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "dead_letter") {
            return Ok(());
        }
        let result = self
            .receiver
            .dead_letter_message(&self.message, reason, description, properties_to_modify)
            .await;
        self.guard.finish(result)
    }

    fn is_settled(&self) -> bool {
        self.guard.is_settled()
    }
}

/// Settles through the actions of a session message event
#[derive(Debug)]
pub struct SessionSettlement {
    actions: Arc<dyn SessionMessageActions>,
    message: ServiceBusReceivedMessage,
    guard: SettleOnce,
}

impl SessionSettlement {
    pub fn new(actions: Arc<dyn SessionMessageActions>, message: ServiceBusReceivedMessage) -> Self {
        Self {
            actions,
            message,
            guard: SettleOnce::default(),
        }
    }
}

#[async_trait]
impl MessageSettlement for SessionSettlement {
    async fn complete(&self) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "complete") {
            return Ok(());
        }
        let result = self.actions.complete_message(&self.message).await;
        self.guard.finish(result)
    }

    async fn abandon(&self, properties_to_modify: Option<HashMap<String, Value>>) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "abandon") {
            return Ok(());
        }
        let result = self
            .actions
            .abandon_message(&self.message, properties_to_modify)
            .await;
        self.guard.finish(result)
    }

    async fn dead_letter(
        &self,
        reason: &str,
        description: Option<&str>,
        properties_to_modify: Option<HashMap<String, Value>>,
    ) -> MessagingResult<()> {
        if !self.guard.claim(&self.message.message_id, "dead_letter") {
            return Ok(());
        }
        let result = self
            .actions
            .dead_letter_message(&self.message, reason, description, properties_to_modify)
            .await;
        self.guard.finish(result)
    }

    fn is_settled(&self) -> bool {
        self.guard.is_settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::clients::InMemoryServiceBusReceiver;

    #[tokio::test]
    async fn test_receiver_settlement_settles_once() {
        let receiver = Arc::new(InMemoryServiceBusReceiver::new("sb://test", "orders"));
        receiver.send_message(ServiceBusReceivedMessage::new("msg-1", "{}"));
        let message = receiver.receive_message(None).await.unwrap().unwrap();

        let settlement = ReceiverSettlement::new(receiver.clone(), message);
        settlement.complete().await.unwrap();
        assert!(settlement.is_settled());

        // Second settlement is swallowed instead of failing on the lost lock
        settlement
            .dead_letter("reason", None, None)
            .await
            .unwrap();

        assert_eq!(receiver.completed_messages().len(), 1);
        assert!(receiver.dead_lettered_messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_settlement_can_be_retried() {
        let receiver = Arc::new(InMemoryServiceBusReceiver::new("sb://test", "orders"));
        let unknown = ServiceBusReceivedMessage::new("msg-unknown", "{}");

        let settlement = ReceiverSettlement::new(receiver.clone(), unknown);
        assert!(settlement.complete().await.is_err());
        assert!(!settlement.is_settled());
    }
}
