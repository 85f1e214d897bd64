#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Busroute Core
//!
//! Message routing and message pumps for Azure Service Bus style brokers.
//!
//! ## Overview
//!
//! Applications register typed message handlers with optional context and body
//! filters. Message pumps receive messages from a queue or topic subscription
//! and hand them to a router, which deserializes each body into the handler's
//! message type, picks the first handler that matches and succeeds, and falls
//! back to string-body handlers when none does. The Service Bus router then
//! settles the message: complete on success, abandon on failure, dead-letter
//! when nothing could handle it.
//!
//! ## Module Organization
//!
//! - [`routing`] - Handler registration, matching and the general router
//! - [`servicebus`] - Service Bus message context, fallbacks and default settlement
//! - [`pump`] - Receiver and session message pumps, circuit breaker, pump registry
//! - [`messaging`] - Received messages, broker abstractions, settlement, correlation
//! - [`config`] - Options, validation and configuration loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use busroute::config::ServiceBusMessagePumpOptions;
//! use busroute::messaging::clients::{InMemoryEntity, InMemoryReceiverFactory};
//! use busroute::messaging::{MessageContext, MessageCorrelationInfo};
//! use busroute::pump::{MessagePump, ServiceBusReceiverMessagePump};
//! use busroute::routing::{MessageHandler, MessageHandlerBuilder, MessageHandlerCollection};
//! use busroute::servicebus::ServiceBusMessageRouter;
//! use busroute::HandlerError;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//! }
//!
//! struct OrderHandler;
//!
//! #[async_trait::async_trait]
//! impl MessageHandler<Order> for OrderHandler {
//!     async fn process_message(
//!         &self,
//!         order: Order,
//!         _context: &MessageContext,
//!         _correlation: &MessageCorrelationInfo,
//!         _cancellation: &CancellationToken,
//!     ) -> Result<(), HandlerError> {
//!         println!("processing order {}", order.id);
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! busroute::logging::init_structured_logging();
//!
//! let options = ServiceBusMessagePumpOptions::default().with_job_id("orders-pump");
//! let handlers = MessageHandlerCollection::for_job(options.job_id.clone())?
//!     .with_message_handler(MessageHandlerBuilder::<Order, MessageContext, _>::new(OrderHandler));
//! let router = ServiceBusMessageRouter::new(handlers, options.routing.clone());
//!
//! let entity = Arc::new(InMemoryEntity::new("sb://local", "orders"));
//! let pump = ServiceBusReceiverMessagePump::builder(
//!     router,
//!     Arc::new(InMemoryReceiverFactory::new(entity)),
//!     options,
//! )
//! .build()?;
//!
//! pump.start().await?;
//! pump.stop().await?;
//! # Ok::<(), busroute::BusrouteError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pump;
pub mod routing;
pub mod servicebus;

pub use config::{
    AdditionalMemberHandling, ConfigLoader, MessageDeserializationOptions,
    MessagePumpCircuitBreakerOptions, MessageRouterOptions, ServiceBusMessagePumpOptions,
    ServiceBusSessionOptions,
};
pub use error::{BusrouteError, BusrouteResult, HandlerError};
pub use messaging::{
    CorrelationFormat, MessageContext, MessageCorrelationInfo, MessageProcessingError,
    MessageProcessingResult, MessagingError, ServiceBusReceivedMessage,
};
pub use pump::{
    CircuitState, MessagePump, MessagePumpCircuitBreaker, MessagePumpCircuitState,
    MessagePumpRegistry, MessagePumpState, ServiceBusReceiverMessagePump,
    ServiceBusSessionMessagePump,
};
pub use routing::{
    FallbackMessageHandler, MessageHandler, MessageHandlerBuilder, MessageHandlerCollection,
    MessageRouter,
};
pub use servicebus::{
    ServiceBusEntityType, ServiceBusFallbackMessageHandler, ServiceBusMessageContext,
    ServiceBusMessageRouter,
};
