//! # Busroute Configuration System
//!
//! Options recognized by the message pumps and routers, with defaults,
//! validation, and a loader that layers a configuration file and environment
//! overrides through the `config` crate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use busroute::config::{ConfigLoader, ServiceBusMessagePumpOptions};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // From busroute.toml plus BUSROUTE__* environment overrides
//! let options = ConfigLoader::new().with_file("busroute.toml").load()?;
//!
//! // Or programmatically
//! let options = ServiceBusMessagePumpOptions::default()
//!     .with_job_id("orders-pump")
//!     .with_max_messages_per_batch(10)
//!     .with_message_recovery_period(Duration::from_secs(60));
//! options.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{
    DEFAULT_MAX_CONCURRENT_CALLS_PER_SESSION, DEFAULT_MAX_CONCURRENT_SESSIONS,
    DEFAULT_MAX_MESSAGES_PER_BATCH, DEFAULT_MESSAGE_INTERVAL_DURING_RECOVERY,
    DEFAULT_MESSAGE_RECOVERY_PERIOD, DEFAULT_PREFETCH_COUNT, MAX_MESSAGES_PER_BATCH_LIMIT,
};
use crate::messaging::CorrelationFormat;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Durations travel as milliseconds in configuration sources
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

/// How the default JSON deserialization treats members the target type lacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdditionalMemberHandling {
    /// Unknown members fail deserialization for that handler
    #[default]
    Error,
    /// Unknown members are ignored
    Ignore,
}

/// Options of the default message body deserialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDeserializationOptions {
    pub additional_members: AdditionalMemberHandling,
}

/// Options of the message routers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRouterOptions {
    pub deserialization: MessageDeserializationOptions,
    pub correlation: CorrelationFormat,
    /// Complete successfully handled messages the handler left unsettled
    pub auto_complete: bool,
}

impl Default for MessageRouterOptions {
    fn default() -> Self {
        Self {
            deserialization: MessageDeserializationOptions::default(),
            correlation: CorrelationFormat::default(),
            auto_complete: true,
        }
    }
}

/// Circuit breaker timings of a message pump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePumpCircuitBreakerOptions {
    /// Time the circuit stays open before probing recovery
    #[serde(with = "duration_ms")]
    pub message_recovery_period: Duration,
    /// Delay between failed single-message probes while half-open
    #[serde(with = "duration_ms")]
    pub message_interval_during_recovery: Duration,
}

impl Default for MessagePumpCircuitBreakerOptions {
    fn default() -> Self {
        Self {
            message_recovery_period: DEFAULT_MESSAGE_RECOVERY_PERIOD,
            message_interval_during_recovery: DEFAULT_MESSAGE_INTERVAL_DURING_RECOVERY,
        }
    }
}

impl MessagePumpCircuitBreakerOptions {
    pub fn new(message_recovery_period: Duration, message_interval_during_recovery: Duration) -> Self {
        Self {
            message_recovery_period,
            message_interval_during_recovery,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.message_recovery_period.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.message_recovery_period",
                "0",
                "recovery period must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Session processing options of the session pump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBusSessionOptions {
    pub max_concurrent_sessions: u32,
    pub max_concurrent_calls_per_session: u32,
    /// How long a session is kept without receiving before it is released
    #[serde(with = "duration_ms::option")]
    pub session_idle_timeout: Option<Duration>,
}

impl Default for ServiceBusSessionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            max_concurrent_calls_per_session: DEFAULT_MAX_CONCURRENT_CALLS_PER_SESSION,
            session_idle_timeout: None,
        }
    }
}

impl ServiceBusSessionOptions {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigurationError::invalid_value(
                "session.max_concurrent_sessions",
                self.max_concurrent_sessions,
                "at least one session must be processed",
            ));
        }
        if self.max_concurrent_calls_per_session == 0 {
            return Err(ConfigurationError::invalid_value(
                "session.max_concurrent_calls_per_session",
                self.max_concurrent_calls_per_session,
                "at least one call per session is required",
            ));
        }
        if self.session_idle_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigurationError::invalid_value(
                "session.session_idle_timeout",
                "0",
                "idle timeout must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Options of a Service Bus message pump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBusMessagePumpOptions {
    /// Identifies the pump; handlers scoped to a job only see its messages
    pub job_id: String,
    pub max_messages_per_batch: u32,
    pub prefetch_count: u32,
    pub routing: MessageRouterOptions,
    pub circuit_breaker: MessagePumpCircuitBreakerOptions,
    pub session: ServiceBusSessionOptions,
}

impl Default for ServiceBusMessagePumpOptions {
    fn default() -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            max_messages_per_batch: DEFAULT_MAX_MESSAGES_PER_BATCH,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            routing: MessageRouterOptions::default(),
            circuit_breaker: MessagePumpCircuitBreakerOptions::default(),
            session: ServiceBusSessionOptions::default(),
        }
    }
}

impl ServiceBusMessagePumpOptions {
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_max_messages_per_batch(mut self, max_messages_per_batch: u32) -> Self {
        self.max_messages_per_batch = max_messages_per_batch;
        self
    }

    pub fn with_prefetch_count(mut self, prefetch_count: u32) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_routing(mut self, routing: MessageRouterOptions) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_message_recovery_period(mut self, period: Duration) -> Self {
        self.circuit_breaker.message_recovery_period = period;
        self
    }

    pub fn with_message_interval_during_recovery(mut self, interval: Duration) -> Self {
        self.circuit_breaker.message_interval_during_recovery = interval;
        self
    }

    pub fn with_session(mut self, session: ServiceBusSessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Validate all option values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.job_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "job_id",
                "message pump options",
            ));
        }
        if self.max_messages_per_batch == 0 || self.max_messages_per_batch > MAX_MESSAGES_PER_BATCH_LIMIT {
            return Err(ConfigurationError::invalid_value(
                "max_messages_per_batch",
                self.max_messages_per_batch,
                format!("must be between 1 and {MAX_MESSAGES_PER_BATCH_LIMIT}"),
            ));
        }
        self.circuit_breaker.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServiceBusMessagePumpOptions::default();

        assert!(!options.job_id.is_empty());
        assert_eq!(options.max_messages_per_batch, 1);
        assert_eq!(options.prefetch_count, 0);
        assert!(options.routing.auto_complete);
        assert_eq!(
            options.routing.deserialization.additional_members,
            AdditionalMemberHandling::Error
        );
        assert_eq!(options.routing.correlation, CorrelationFormat::W3C);
        assert_eq!(options.circuit_breaker.message_recovery_period, Duration::from_secs(30));
        assert_eq!(
            options.circuit_breaker.message_interval_during_recovery,
            Duration::from_secs(5)
        );
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_invalid_values() {
        let options = ServiceBusMessagePumpOptions::default().with_job_id("");
        assert!(matches!(
            options.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));

        let options = ServiceBusMessagePumpOptions::default().with_max_messages_per_batch(0);
        assert!(options.validate().is_err());

        let options = ServiceBusMessagePumpOptions::default().with_max_messages_per_batch(4001);
        assert!(options.validate().is_err());

        let options =
            ServiceBusMessagePumpOptions::default().with_message_recovery_period(Duration::ZERO);
        assert!(options.validate().is_err());

        let options = ServiceBusMessagePumpOptions::default().with_session(ServiceBusSessionOptions {
            max_concurrent_sessions: 0,
            ..Default::default()
        });
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_durations_serialize_as_milliseconds() {
        let options = MessagePumpCircuitBreakerOptions::new(
            Duration::from_millis(1500),
            Duration::from_millis(250),
        );

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["message_recovery_period"], 1500);
        assert_eq!(json["message_interval_during_recovery"], 250);

        let parsed: MessagePumpCircuitBreakerOptions = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, options);
    }
}
