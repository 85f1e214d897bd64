//! # Message Correlation
//!
//! Extracts the correlation (transaction, operation, parent operation) of a
//! received message from its application properties, in either the W3C trace
//! context format or the hierarchical `Transaction-Id`/`Operation-Parent-Id`
//! format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::properties;
use crate::messaging::ServiceBusReceivedMessage;

/// How correlation is carried on messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrelationFormat {
    /// `Diagnostic-Id` holding a W3C `traceparent`
    #[default]
    W3C,
    /// `Transaction-Id` and `Operation-Parent-Id` application properties
    Hierarchical,
}

/// Correlation of one routed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCorrelationInfo {
    pub transaction_id: String,
    pub operation_id: String,
    pub operation_parent_id: Option<String>,
}

impl MessageCorrelationInfo {
    pub fn new(
        transaction_id: impl Into<String>,
        operation_id: impl Into<String>,
        operation_parent_id: Option<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            operation_id: operation_id.into(),
            operation_parent_id,
        }
    }

    /// Fresh correlation for a message that carries none
    pub fn generate() -> Self {
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            operation_id: Uuid::new_v4().to_string(),
            operation_parent_id: None,
        }
    }

    /// Extract the correlation of `message` in the given format
    pub fn from_message(message: &ServiceBusReceivedMessage, format: CorrelationFormat) -> Self {
        match format {
            CorrelationFormat::Hierarchical => Self::from_hierarchical(message),
            CorrelationFormat::W3C => Self::from_w3c(message),
        }
    }

    fn from_hierarchical(message: &ServiceBusReceivedMessage) -> Self {
        let transaction_id = message
            .application_property_str(properties::TRANSACTION_ID)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let operation_id = message
            .correlation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let operation_parent_id = message
            .application_property_str(properties::OPERATION_PARENT_ID)
            .filter(|id| !id.is_empty());

        Self {
            transaction_id,
            operation_id,
            operation_parent_id,
        }
    }

    fn from_w3c(message: &ServiceBusReceivedMessage) -> Self {
        let operation_id = new_span_id();
        match message
            .application_property_str(properties::DIAGNOSTIC_ID)
            .as_deref()
            .and_then(TraceParent::parse)
        {
            Some(parent) => Self {
                transaction_id: parent.trace_id,
                operation_id,
                operation_parent_id: Some(parent.span_id),
            },
            None => Self {
                transaction_id: new_trace_id(),
                operation_id,
                operation_parent_id: None,
            },
        }
    }
}

/// Parsed W3C `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq)]
struct TraceParent {
    trace_id: String,
    span_id: String,
}

impl TraceParent {
    /// Parse `00-<32 hex>-<16 hex>-<2 hex>`; all-zero ids are invalid
    fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let valid = is_lower_hex(version, 2)
            && version != "ff"
            && is_lower_hex(trace_id, 32)
            && is_lower_hex(span_id, 16)
            && is_lower_hex(flags, 2)
            && trace_id.chars().any(|c| c != '0')
            && span_id.chars().any(|c| c != '0');

        valid.then(|| Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
        })
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}
