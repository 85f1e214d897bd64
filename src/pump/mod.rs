//! # Message Pumps
//!
//! Background processes receiving messages from a Service Bus entity and
//! handing them to the Service Bus router:
//!
//! - [`ServiceBusReceiverMessagePump`]: polls a receiver in batches, throttled
//!   by a per-pump circuit breaker
//! - [`ServiceBusSessionMessagePump`]: driven by a session processor
//! - [`MessagePumpRegistry`] and [`MessagePumpCircuitBreaker`]: pause and
//!   resume pumps by job id

pub mod circuit_breaker;
pub mod lifecycle;
pub mod message_pump;
pub mod receiver_pump;
pub mod registry;
pub mod session_pump;

pub use circuit_breaker::{
    CircuitBreakerEventHandler, CircuitState, MessagePumpCircuitState,
    MessagePumpCircuitStateChangedEventArgs, PumpCircuitBreaker,
};
pub use lifecycle::MessagePumpState;
pub use message_pump::{MessagePump, MessagePumpStats, MessagePumpStatsSnapshot};
pub use receiver_pump::{ServiceBusReceiverMessagePump, ServiceBusReceiverMessagePumpBuilder};
pub use registry::{MessagePumpCircuitBreaker, MessagePumpRegistry};
pub use session_pump::ServiceBusSessionMessagePump;
