//! # Messaging Module
//!
//! Broker-facing building blocks: received messages, receiver and session
//! processor abstractions, settlement strategies, message contexts, correlation
//! and processing results.

pub mod clients;
pub mod context;
pub mod correlation;
pub mod errors;
pub mod message;
pub mod receiver;
pub mod result;
pub mod settlement;

pub use context::{HandlerContext, MessageContext, RoutingContext};
pub use correlation::{CorrelationFormat, MessageCorrelationInfo};
pub use errors::MessagingError;
pub use message::ServiceBusReceivedMessage;
pub use receiver::{
    MessagingResult, ProcessErrorEventArgs, ProcessSessionMessageEventArgs, ServiceBusErrorSource,
    ServiceBusReceiver, ServiceBusReceiverFactory, ServiceBusSessionProcessor,
    ServiceBusSessionProcessorFactory, SessionMessageActions, SessionProcessorHandler,
};
pub use result::{MessageProcessingError, MessageProcessingResult};
pub use settlement::{MessageSettlement, ReceiverSettlement, SessionSettlement};
