//! Handler matching and dispatch through the general message router

mod common;

use busroute::config::{AdditionalMemberHandling, MessageDeserializationOptions, MessageRouterOptions};
use busroute::messaging::{MessageContext, MessageCorrelationInfo, MessageProcessingError};
use busroute::routing::{
    serializer_fn, DeserializationError, MessageHandlerBuilder, MessageHandlerCollection,
    MessageRouter,
};
use busroute::{HandlerError, MessageHandler, MessageProcessingResult};
use common::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

async fn route(router: &MessageRouter, body: &str, context: &MessageContext) -> MessageProcessingResult {
    router
        .route_message(
            body,
            context,
            &MessageCorrelationInfo::generate(),
            &CancellationToken::new(),
        )
        .await
}

fn order_handler(handler: OrderHandler) -> MessageHandlerBuilder<Order, MessageContext, OrderHandler> {
    MessageHandlerBuilder::new(handler)
}

#[tokio::test]
async fn test_zero_handlers_cannot_find_matched_handler() {
    let router = MessageRouter::new(MessageHandlerCollection::new(), MessageRouterOptions::default());

    let result = route(&router, &order_body("o-1", 10), &message_context("m-1", "job")).await;

    assert!(!result.is_successful());
    assert_eq!(result.message_id(), "m-1");
    assert_eq!(result.error(), Some(MessageProcessingError::CannotFindMatchedHandler));
}

#[tokio::test]
async fn test_single_matching_handler_processes_message() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(order_handler(OrderHandler::succeeding("only", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-1", 10), &message_context("m-1", "job")).await;

    assert!(result.is_successful());
    assert_eq!(log.entries(), vec!["only:o-1".to_string()]);
}

#[tokio::test]
async fn test_failing_handler_falls_through_to_next_matching_handler() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(order_handler(OrderHandler::failing("first", &log)))
        .with_message_handler(order_handler(OrderHandler::succeeding("second", &log)))
        .with_message_handler(order_handler(OrderHandler::succeeding("third", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-7", 10), &message_context("m-7", "job")).await;

    assert!(result.is_successful());
    assert_eq!(
        log.entries(),
        vec!["first:o-7".to_string(), "second:o-7".to_string()]
    );
}

#[tokio::test]
async fn test_all_matching_handlers_failing_reports_failure_with_cause() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(order_handler(OrderHandler::failing("first", &log)))
        .with_message_handler(order_handler(OrderHandler::failing("second", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-1", 10), &message_context("m-1", "job")).await;

    assert_eq!(result.error(), Some(MessageProcessingError::MatchedHandlerFailed));
    let cause = result.error_cause().expect("handler error is captured");
    assert!(cause.to_string().contains("second rejected order o-1"));
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_deserialization_failure_skips_to_next_handler_type() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(MessageHandlerBuilder::<Shipment, MessageContext, _>::new(
            ShipmentHandler { log: log.clone() },
        ))
        .with_message_handler(order_handler(OrderHandler::succeeding("order", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-3", 10), &message_context("m-3", "job")).await;

    assert!(result.is_successful());
    assert_eq!(log.entries(), vec!["order:o-3".to_string()]);
}

#[tokio::test]
async fn test_deserialization_failure_skips_to_next_handler_of_same_type() {
    let log = CallLog::new();
    let rejecting = serializer_fn(|_body: &str| -> Result<Order, DeserializationError> {
        Err(DeserializationError::custom("legacy order format only"))
    });
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(
            order_handler(OrderHandler::succeeding("legacy", &log)).with_message_body_serializer(rejecting),
        )
        .with_message_handler(order_handler(OrderHandler::succeeding("json", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-4", 10), &message_context("m-4", "job")).await;

    assert!(result.is_successful());
    assert_eq!(log.entries(), vec!["json:o-4".to_string()]);
}

/// Order whose optional members are omitted when serialized
#[derive(Debug, Serialize, Deserialize)]
struct AnnotatedOrder {
    order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    #[serde(default, alias = "qty")]
    quantity: u32,
}

struct AnnotatedOrderHandler {
    log: CallLog,
}

#[async_trait::async_trait]
impl MessageHandler<AnnotatedOrder> for AnnotatedOrderHandler {
    async fn process_message(
        &self,
        message: AnnotatedOrder,
        _context: &MessageContext,
        _correlation: &MessageCorrelationInfo,
        _cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.record(format!(
            "annotated:{}:{}:{}",
            message.order_id,
            message.note.as_deref().unwrap_or("-"),
            message.quantity
        ));
        Ok(())
    }
}

#[tokio::test]
async fn test_declared_members_reach_handler_under_strict_members() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new().with_message_handler(
        MessageHandlerBuilder::<AnnotatedOrder, MessageContext, _>::new(AnnotatedOrderHandler {
            log: log.clone(),
        }),
    );
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(
        &router,
        r#"{"order_id":"o-1","note":null,"qty":2}"#,
        &message_context("m-1", "job"),
    )
    .await;
    assert!(result.is_successful());

    let result = route(
        &router,
        r#"{"order_id":"o-2","note":"fragile","unexpected":true}"#,
        &message_context("m-2", "job"),
    )
    .await;
    assert_eq!(result.error(), Some(MessageProcessingError::CannotFindMatchedHandler));

    assert_eq!(log.entries(), vec!["annotated:o-1:-:2".to_string()]);
}

#[tokio::test]
async fn test_additional_members_rejected_unless_ignored() {
    let body = r#"{"order_id":"o-1","amount":10,"priority":"high"}"#;

    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(order_handler(OrderHandler::succeeding("order", &log)));

    let strict = MessageRouter::new(handlers.clone(), MessageRouterOptions::default());
    let result = route(&strict, body, &message_context("m-1", "job")).await;
    assert_eq!(result.error(), Some(MessageProcessingError::CannotFindMatchedHandler));
    assert_eq!(log.len(), 0);

    let lenient = MessageRouter::new(
        handlers,
        MessageRouterOptions {
            deserialization: MessageDeserializationOptions {
                additional_members: AdditionalMemberHandling::Ignore,
            },
            ..Default::default()
        },
    );
    let result = route(&lenient, body, &message_context("m-1", "job")).await;
    assert!(result.is_successful());
    assert_eq!(log.entries(), vec!["order:o-1".to_string()]);
}

#[tokio::test]
async fn test_context_and_body_filters_select_handler() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(
            order_handler(OrderHandler::succeeding("large", &log))
                .with_message_body_filter("amount >= 100", |order: &Order| order.amount >= 100),
        )
        .with_message_handler(
            order_handler(OrderHandler::succeeding("priority", &log)).with_context_filter(
                "priority property",
                |context: &MessageContext| context.property("Priority").is_some(),
            ),
        )
        .with_message_handler(order_handler(OrderHandler::succeeding("default", &log)));
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    route(&router, &order_body("big", 150), &message_context("m-1", "job")).await;
    route(&router, &order_body("small", 5), &message_context("m-2", "job")).await;

    let mut properties = std::collections::HashMap::new();
    properties.insert("Priority".to_string(), serde_json::json!("high"));
    let priority_context = MessageContext::new("m-3", "job", properties).unwrap();
    route(&router, &order_body("urgent", 5), &priority_context).await;

    assert_eq!(
        log.entries(),
        vec![
            "large:big".to_string(),
            "default:small".to_string(),
            "priority:urgent".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_custom_serializer_replaces_json_deserialization() {
    let log = CallLog::new();
    let serializer = serializer_fn(|body: &str| {
        let (order_id, amount) = body
            .split_once(';')
            .ok_or_else(|| DeserializationError::custom("expected '<id>;<amount>'"))?;
        let amount = amount
            .parse()
            .map_err(|_| DeserializationError::custom("amount is not a number"))?;
        Ok(order(order_id, amount))
    });
    let handlers = MessageHandlerCollection::new().with_message_handler(
        order_handler(OrderHandler::succeeding("csv", &log)).with_message_body_serializer(serializer),
    );
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    assert!(route(&router, "o-9;12", &message_context("m-1", "job")).await.is_successful());
    assert!(!route(&router, "not an order", &message_context("m-2", "job")).await.is_successful());
    assert_eq!(log.entries(), vec!["csv:o-9".to_string()]);
}

#[tokio::test]
async fn test_fallback_receives_unmatched_body() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new()
        .with_message_handler(MessageHandlerBuilder::<Shipment, MessageContext, _>::new(
            ShipmentHandler { log: log.clone() },
        ))
        .with_fallback_message_handler::<MessageContext, _>(RecordingFallback {
            log: log.clone(),
            fail: false,
        });
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, &order_body("o-1", 1), &message_context("m-1", "job")).await;

    assert!(result.is_successful());
    assert_eq!(log.entries(), vec!["fallback:m-1".to_string()]);
}

#[tokio::test]
async fn test_failing_fallback_reports_matched_handler_failed() {
    let log = CallLog::new();
    let handlers = MessageHandlerCollection::new().with_fallback_message_handler::<MessageContext, _>(RecordingFallback {
        log: log.clone(),
        fail: true,
    });
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    let result = route(&router, "plain text", &message_context("m-1", "job")).await;

    assert_eq!(result.error(), Some(MessageProcessingError::MatchedHandlerFailed));
    assert_eq!(log.entries(), vec!["fallback:m-1".to_string()]);
}

#[tokio::test]
async fn test_scoped_handler_factory_creates_instance_per_message() {
    let log = CallLog::new();
    let created = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let factory_log = log.clone();
    let factory_created = created.clone();
    let handlers = MessageHandlerCollection::new().with_message_handler(
        MessageHandlerBuilder::<Order, MessageContext, _>::from_factory(move || {
            factory_created.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            OrderHandler::succeeding("scoped", &factory_log)
        }),
    );
    let router = MessageRouter::new(handlers, MessageRouterOptions::default());

    route(&router, &order_body("a", 1), &message_context("m-1", "job")).await;
    route(&router, &order_body("b", 1), &message_context("m-2", "job")).await;

    assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(log.len(), 2);
}
