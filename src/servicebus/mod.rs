//! # Service Bus
//!
//! Service Bus specifics on top of the general routing: the message context
//! with settlement, fallback handlers receiving the raw message, and the
//! router applying default settlement.

pub mod context;
pub mod fallback;
pub mod router;

pub use context::{ServiceBusEntityType, ServiceBusMessageContext, ServiceBusSystemProperties};
pub use fallback::{ServiceBusFallbackMessageHandler, ServiceBusFallbackRegistration};
pub use router::ServiceBusMessageRouter;
