//! # Broker Client Implementations
//!
//! In-memory implementations of the receiver and session processor traits.

pub mod in_memory;

pub use in_memory::{
    InMemoryEntity, InMemoryReceiverFactory, InMemoryServiceBusReceiver, InMemorySessionProcessor,
    InMemorySessionProcessorFactory,
};
