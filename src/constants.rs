//! # System Constants
//!
//! Property names, settlement reasons and operational defaults shared by the
//! routers and pumps.

use std::time::Duration;

/// Application property names recognized on received messages
pub mod properties {
    /// W3C `traceparent` carried by the Service Bus SDKs
    pub const DIAGNOSTIC_ID: &str = "Diagnostic-Id";
    /// Hierarchical correlation: transaction
    pub const TRANSACTION_ID: &str = "Transaction-Id";
    /// Hierarchical correlation: parent operation
    pub const OPERATION_PARENT_ID: &str = "Operation-Parent-Id";
}

/// Dead-letter reasons and descriptions used for default settlement
pub mod dead_letter {
    pub const NO_HANDLERS_REGISTERED_REASON: &str = "No message handlers were registered";
    pub const NO_HANDLERS_REGISTERED_DESCRIPTION: &str =
        "No message handlers were registered in the application to process the received message";
    pub const NO_HANDLER_MATCHED_REASON: &str =
        "No message handler was matched on the message and no fallback message handler was registered";
    pub const NO_HANDLER_MATCHED_DESCRIPTION: &str =
        "None of the registered message handlers accepted the message body or context, and no fallback message handler was available";
}

/// Largest batch a Service Bus receive call returns
pub const MAX_MESSAGES_PER_BATCH_LIMIT: u32 = 4000;

/// Default number of messages per batch receive
pub const DEFAULT_MAX_MESSAGES_PER_BATCH: u32 = 1;

/// Default prefetch count (no prefetch)
pub const DEFAULT_PREFETCH_COUNT: u32 = 0;

/// Default wait before probing recovery after the circuit opened
pub const DEFAULT_MESSAGE_RECOVERY_PERIOD: Duration = Duration::from_secs(30);

/// Default delay between failed single-message probes while half-open
pub const DEFAULT_MESSAGE_INTERVAL_DURING_RECOVERY: Duration = Duration::from_secs(5);

/// Default number of sessions processed concurrently
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: u32 = 8;

/// Default number of concurrent calls per session
pub const DEFAULT_MAX_CONCURRENT_CALLS_PER_SESSION: u32 = 1;

/// Maximum wait of one receive call issued by the polling pump
pub const RECEIVE_MAX_WAIT_TIME: Duration = Duration::from_secs(1);

/// Delay before retrying after an unexpected receive-loop failure
pub const RECEIVE_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Default receive wait of the in-memory receiver
pub const IN_MEMORY_DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Environment variable prefix of configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "BUSROUTE";
