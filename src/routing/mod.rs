//! # Message Routing
//!
//! Handler registration, matching and dispatch of received messages.

pub mod handler;
pub mod predicate;
pub mod registration;
pub mod router;
pub mod serializer;

pub use handler::{FallbackMessageHandler, MessageHandler};
pub use predicate::Predicate;
pub use registration::{
    FallbackMessageHandlerRegistration, MessageHandlerBuilder, MessageHandlerCollection,
    MessageHandlerRegistration,
};
pub use router::MessageRouter;
pub use serializer::{
    serializer_fn, DeserializationError, FnMessageBodySerializer, JsonMessageBodySerializer,
    MessageBodySerializer,
};
