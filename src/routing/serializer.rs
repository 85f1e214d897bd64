//! # Message Body Serialization
//!
//! Turns a raw message body into the message type a handler expects. The
//! default JSON deserialization honours [`AdditionalMemberHandling`]; handlers
//! can bring their own [`MessageBodySerializer`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

use crate::config::AdditionalMemberHandling;

/// Why a body could not be turned into a handler's message type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeserializationError {
    #[error("Body is not valid JSON for the expected message type: {0}")]
    InvalidJson(String),

    #[error("Body carries members the message type does not declare: {}", .members.join(", "))]
    AdditionalMembers { members: Vec<String> },

    #[error("Body deserialized to a null message")]
    NullMessage,

    #[error("Custom deserialization failed: {0}")]
    Custom(String),
}

impl DeserializationError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Deserializes message bodies into `M`
pub trait MessageBodySerializer<M>: Send + Sync {
    fn deserialize_message(&self, body: &str) -> Result<M, DeserializationError>;
}

/// Default JSON deserialization
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageBodySerializer {
    additional_members: AdditionalMemberHandling,
}

impl JsonMessageBodySerializer {
    pub fn new(additional_members: AdditionalMemberHandling) -> Self {
        Self { additional_members }
    }
}

impl<M> MessageBodySerializer<M> for JsonMessageBodySerializer
where
    M: DeserializeOwned,
{
    fn deserialize_message(&self, body: &str) -> Result<M, DeserializationError> {
        deserialize_json(body, self.additional_members)
    }
}

/// Deserialize `body` as JSON into `M`.
///
/// With [`AdditionalMemberHandling::Error`] any top-level member of the body
/// that `M` does not declare fails the deserialization. Unknown members are
/// detected while deserializing, so declared members that are skipped on
/// serialization or accepted through an alias still count as declared.
pub(crate) fn deserialize_json<M>(
    body: &str,
    additional_members: AdditionalMemberHandling,
) -> Result<M, DeserializationError>
where
    M: DeserializeOwned,
{
    let value: Value =
        serde_json::from_str(body).map_err(|e| DeserializationError::InvalidJson(e.to_string()))?;

    if value.is_null() {
        return Err(DeserializationError::NullMessage);
    }

    if additional_members == AdditionalMemberHandling::Ignore {
        return serde_json::from_value(value)
            .map_err(|e| DeserializationError::InvalidJson(e.to_string()));
    }

    let mut unknown: Vec<String> = Vec::new();
    let message: M = serde_ignored::deserialize(value, |path| {
        if let serde_ignored::Path::Map {
            parent: serde_ignored::Path::Root,
            key,
        } = path
        {
            unknown.push(key);
        }
    })
    .map_err(|e| DeserializationError::InvalidJson(e.to_string()))?;

    if !unknown.is_empty() {
        unknown.sort();
        return Err(DeserializationError::AdditionalMembers { members: unknown });
    }

    Ok(message)
}

/// Adapts a function into a [`MessageBodySerializer`]
pub struct FnMessageBodySerializer<M, F> {
    deserialize: F,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> fmt::Debug for FnMessageBodySerializer<M, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMessageBodySerializer")
            .field("message_type", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M, F> MessageBodySerializer<M> for FnMessageBodySerializer<M, F>
where
    F: Fn(&str) -> Result<M, DeserializationError> + Send + Sync,
{
    fn deserialize_message(&self, body: &str) -> Result<M, DeserializationError> {
        (self.deserialize)(body)
    }
}

/// Build a serializer from a closure
pub fn serializer_fn<M, F>(deserialize: F) -> FnMessageBodySerializer<M, F>
where
    F: Fn(&str) -> Result<M, DeserializationError> + Send + Sync,
{
    FnMessageBodySerializer {
        deserialize,
        _message: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: String,
        amount: u32,
    }

    #[test]
    fn test_deserializes_exact_members() {
        let order: Order =
            deserialize_json(r#"{"id":"o-1","amount":3}"#, AdditionalMemberHandling::Error).unwrap();
        assert_eq!(
            order,
            Order {
                id: "o-1".to_string(),
                amount: 3
            }
        );
    }

    #[test]
    fn test_additional_members_rejected_or_ignored() {
        let body = r#"{"id":"o-1","amount":3,"carrier":"dhl"}"#;

        let result: Result<Order, _> = deserialize_json(body, AdditionalMemberHandling::Error);
        assert_eq!(
            result,
            Err(DeserializationError::AdditionalMembers {
                members: vec!["carrier".to_string()]
            })
        );

        let order: Order = deserialize_json(body, AdditionalMemberHandling::Ignore).unwrap();
        assert_eq!(order.id, "o-1");
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct AnnotatedOrder {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        #[serde(default, skip_serializing)]
        priority: u8,
        #[serde(default, alias = "qty")]
        quantity: u32,
    }

    #[test]
    fn test_declared_members_skipped_on_serialization_are_accepted() {
        let order: AnnotatedOrder = deserialize_json(
            r#"{"id":"o-1","note":null,"priority":2,"qty":4}"#,
            AdditionalMemberHandling::Error,
        )
        .unwrap();

        assert_eq!(order.note, None);
        assert_eq!(order.priority, 2);
        assert_eq!(order.quantity, 4);
    }

    #[test]
    fn test_only_top_level_members_are_checked() {
        #[derive(Debug, Deserialize)]
        struct Envelope {
            payload: Value,
        }

        let result: Result<Envelope, _> = deserialize_json(
            r#"{"payload":{"anything":1}}"#,
            AdditionalMemberHandling::Error,
        );
        assert!(result.is_ok());

        let result: Result<AnnotatedOrder, _> = deserialize_json(
            r#"{"id":"o-1","carrier":"dhl","zone":3}"#,
            AdditionalMemberHandling::Error,
        );
        assert_eq!(
            result,
            Err(DeserializationError::AdditionalMembers {
                members: vec!["carrier".to_string(), "zone".to_string()]
            })
        );
    }

    #[test]
    fn test_null_and_invalid_bodies() {
        let result: Result<Option<Order>, _> = deserialize_json("null", AdditionalMemberHandling::Ignore);
        assert_eq!(result, Err(DeserializationError::NullMessage));

        let result: Result<Order, _> = deserialize_json("not json", AdditionalMemberHandling::Ignore);
        assert!(matches!(result, Err(DeserializationError::InvalidJson(_))));

        let result: Result<Order, _> = deserialize_json(r#"{"id":"o-1"}"#, AdditionalMemberHandling::Ignore);
        assert!(matches!(result, Err(DeserializationError::InvalidJson(_))));
    }

    #[test]
    fn test_custom_serializer() {
        let serializer = serializer_fn(|body: &str| {
            body.strip_prefix("order:")
                .map(|id| Order {
                    id: id.to_string(),
                    amount: 0,
                })
                .ok_or_else(|| DeserializationError::custom("missing order prefix"))
        });

        assert_eq!(serializer.deserialize_message("order:o-9").unwrap().id, "o-9");
        assert!(serializer.deserialize_message("o-9").is_err());
    }
}
