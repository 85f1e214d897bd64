//! Lifecycle states of a message pump.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::debug;

/// NotStarted → Starting → Running → ShuttingDown → Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagePumpState {
    NotStarted = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl From<u8> for MessagePumpState {
    fn from(value: u8) -> Self {
        match value {
            0 => MessagePumpState::NotStarted,
            1 => MessagePumpState::Starting,
            2 => MessagePumpState::Running,
            3 => MessagePumpState::ShuttingDown,
            _ => MessagePumpState::Stopped,
        }
    }
}

impl MessagePumpState {
    /// Whether `start` may be called in this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Stopped)
    }

    pub fn is_running(&self) -> bool {
        *self == Self::Running
    }
}

impl fmt::Display for MessagePumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Atomic holder of a pump's lifecycle state
#[derive(Debug)]
pub(crate) struct PumpStateCell {
    job_id: String,
    state: AtomicU8,
}

impl PumpStateCell {
    pub(crate) fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: AtomicU8::new(MessagePumpState::NotStarted as u8),
        }
    }

    pub(crate) fn get(&self) -> MessagePumpState {
        MessagePumpState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: MessagePumpState) {
        let previous = MessagePumpState::from(self.state.swap(state as u8, Ordering::AcqRel));
        debug!(
            job_id = %self.job_id,
            from = %previous,
            to = %state,
            "Message pump state changed"
        );
    }

    /// Move from `expected` to `state`; false when another state was current
    pub(crate) fn transition(&self, expected: MessagePumpState, state: MessagePumpState) -> bool {
        let moved = self
            .state
            .compare_exchange(expected as u8, state as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(
                job_id = %self.job_id,
                from = %expected,
                to = %state,
                "Message pump state changed"
            );
        }
        moved
    }
}
