//! # Message Pump Circuit Breaker
//!
//! Per-pump circuit state throttling message retrieval while downstream
//! dependencies fail:
//!
//! - **Closed**: batches are received and processed concurrently
//! - **Open**: retrieval is paused for the message recovery period
//! - **HalfOpen**: single messages are probed until one succeeds
//!
//! The receive loop of the owning pump drives the state; pause and resume
//! notifications may arrive from any task. Every state change notifies the
//! registered [`CircuitBreakerEventHandler`]s on detached tasks: the loop
//! never waits for them, and handlers get no ordering guarantee relative to
//! each other.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::MessagePumpCircuitBreakerOptions;

/// Circuit breaker states of a message pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - batches are received
    Closed = 0,
    /// Retrieval paused until the recovery period elapsed
    Open = 1,
    /// Testing recovery - one message at a time
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// A circuit state together with the timings that apply in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePumpCircuitState {
    state: CircuitState,
    options: MessagePumpCircuitBreakerOptions,
}

impl MessagePumpCircuitState {
    pub fn closed(options: MessagePumpCircuitBreakerOptions) -> Self {
        Self {
            state: CircuitState::Closed,
            options,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn options(&self) -> &MessagePumpCircuitBreakerOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state == CircuitState::HalfOpen
    }

    /// Next state for `target`; `options` replace the current timings when given.
    ///
    /// Defined for every (state, target) pair.
    pub fn transition_to(
        &self,
        target: CircuitState,
        options: Option<MessagePumpCircuitBreakerOptions>,
    ) -> Self {
        Self {
            state: target,
            options: options.unwrap_or_else(|| self.options.clone()),
        }
    }
}

impl fmt::Display for MessagePumpCircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)
    }
}

/// A state change of a pump's circuit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePumpCircuitStateChangedEventArgs {
    pub job_id: String,
    pub old_state: MessagePumpCircuitState,
    pub new_state: MessagePumpCircuitState,
}

/// Observer of circuit state changes of a pump
#[async_trait]
pub trait CircuitBreakerEventHandler: Send + Sync {
    async fn on_transition(&self, args: MessagePumpCircuitStateChangedEventArgs);
}

/// Circuit of a single pump
pub struct PumpCircuitBreaker {
    job_id: String,
    state: AtomicU8,
    current: RwLock<MessagePumpCircuitState>,
    default_options: MessagePumpCircuitBreakerOptions,
    event_handlers: Vec<Arc<dyn CircuitBreakerEventHandler>>,
    transition_count: AtomicU64,
}

impl PumpCircuitBreaker {
    pub fn new(
        job_id: impl Into<String>,
        options: MessagePumpCircuitBreakerOptions,
        event_handlers: Vec<Arc<dyn CircuitBreakerEventHandler>>,
    ) -> Self {
        let job_id = job_id.into();
        debug!(
            job_id = %job_id,
            recovery_period_ms = options.message_recovery_period.as_millis() as u64,
            interval_during_recovery_ms = options.message_interval_during_recovery.as_millis() as u64,
            event_handlers = event_handlers.len(),
            "Message pump circuit breaker initialized"
        );

        Self {
            job_id,
            state: AtomicU8::new(CircuitState::Closed as u8),
            current: RwLock::new(MessagePumpCircuitState::closed(options.clone())),
            default_options: options,
            event_handlers,
            transition_count: AtomicU64::new(0),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current state (lock-free)
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Current state with its timings
    pub fn current(&self) -> MessagePumpCircuitState {
        self.current.read().clone()
    }

    /// Number of state changes since creation
    pub fn transition_count(&self) -> u64 {
        self.transition_count.load(Ordering::Relaxed)
    }

    /// Closed → Open, with optional replacement timings
    pub fn transition_to_open(&self, options: Option<MessagePumpCircuitBreakerOptions>) {
        self.transition(None, CircuitState::Open, options);
    }

    /// Open → HalfOpen, only when still open
    pub fn transition_to_half_open(&self) -> bool {
        self.transition(Some(CircuitState::Open), CircuitState::HalfOpen, None)
    }

    /// Back to Closed with the timings the pump was configured with
    pub fn transition_to_closed(&self) {
        self.transition(None, CircuitState::Closed, Some(self.default_options.clone()));
    }

    /// HalfOpen → Closed after a successful probe; a pause that arrived
    /// meanwhile is kept
    pub fn close_after_recovery(&self) -> bool {
        self.transition(
            Some(CircuitState::HalfOpen),
            CircuitState::Closed,
            Some(self.default_options.clone()),
        )
    }

    /// Reset to Closed without notifying (pump start)
    pub(crate) fn reset(&self) {
        let mut current = self.current.write();
        *current = MessagePumpCircuitState::closed(self.default_options.clone());
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
    }

    /// Apply a transition; returns false when `expected` did not hold or the
    /// state did not change
    fn transition(
        &self,
        expected: Option<CircuitState>,
        target: CircuitState,
        options: Option<MessagePumpCircuitBreakerOptions>,
    ) -> bool {
        let (old_state, new_state) = {
            let mut current = self.current.write();
            if expected.is_some_and(|expected| current.state() != expected) {
                return false;
            }

            let old_state = current.clone();
            let new_state = current.transition_to(target, options);
            *current = new_state.clone();
            self.state.store(target as u8, Ordering::Release);
            (old_state, new_state)
        };

        if old_state.state() == new_state.state() {
            debug!(
                job_id = %self.job_id,
                state = %new_state,
                "Message pump circuit already in requested state"
            );
            return false;
        }

        self.transition_count.fetch_add(1, Ordering::Relaxed);
        self.log_transition(&old_state, &new_state);
        self.notify(old_state, new_state);
        true
    }

    fn log_transition(&self, old_state: &MessagePumpCircuitState, new_state: &MessagePumpCircuitState) {
        let options = new_state.options();
        match new_state.state() {
            CircuitState::Open => error!(
                job_id = %self.job_id,
                old_state = %old_state,
                recovery_period_ms = options.message_recovery_period.as_millis() as u64,
                "Message pump circuit opened (message retrieval paused)"
            ),
            CircuitState::HalfOpen => info!(
                job_id = %self.job_id,
                old_state = %old_state,
                interval_during_recovery_ms = options.message_interval_during_recovery.as_millis() as u64,
                "Message pump circuit half-open (probing single messages)"
            ),
            CircuitState::Closed => info!(
                job_id = %self.job_id,
                old_state = %old_state,
                "Message pump circuit closed (message retrieval resumed)"
            ),
        }
    }

    /// Fire-and-forget notification of the event handlers
    fn notify(&self, old_state: MessagePumpCircuitState, new_state: MessagePumpCircuitState) {
        if self.event_handlers.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                job_id = %self.job_id,
                "No async runtime available, circuit breaker event handlers not notified"
            );
            return;
        };

        for handler in &self.event_handlers {
            let handler = Arc::clone(handler);
            let args = MessagePumpCircuitStateChangedEventArgs {
                job_id: self.job_id.clone(),
                old_state: old_state.clone(),
                new_state: new_state.clone(),
            };
            runtime.spawn(async move {
                handler.on_transition(args).await;
            });
        }
    }
}

impl fmt::Debug for PumpCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpCircuitBreaker")
            .field("job_id", &self.job_id)
            .field("state", &self.state())
            .field("event_handlers", &self.event_handlers.len())
            .finish()
    }
}
