//! # Handler Registration
//!
//! Declarative handler registration: a [`MessageHandlerBuilder`] pairs a
//! message type, a context type, optional context and body predicates, an
//! optional custom body serializer and the handler instance (or a factory
//! creating one per message). A [`MessageHandlerCollection`] keeps the
//! resolved registrations in registration order; when bound to a job id, every
//! registration additionally requires `context.job_id() == job_id`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::handler::{FallbackMessageHandler, HandlerSource, MessageHandler};
use super::predicate::Predicate;
use super::serializer::{deserialize_json, DeserializationError, MessageBodySerializer};
use crate::config::AdditionalMemberHandling;
use crate::error::{BusrouteError, BusrouteResult, HandlerError};
use crate::messaging::{HandlerContext, MessageContext, MessageCorrelationInfo, RoutingContext};
use crate::servicebus::fallback::{ServiceBusFallbackMessageHandler, ServiceBusFallbackRegistration};

pub(crate) type ErasedMessage = Box<dyn Any + Send + Sync>;

type JsonDeserializeFn<M> = fn(&str, AdditionalMemberHandling) -> Result<M, DeserializationError>;

enum BodyDeserializer<M> {
    Json(JsonDeserializeFn<M>),
    Custom(Arc<dyn MessageBodySerializer<M>>),
}

impl<M> BodyDeserializer<M> {
    fn deserialize(
        &self,
        body: &str,
        additional_members: AdditionalMemberHandling,
    ) -> Result<M, DeserializationError> {
        match self {
            Self::Json(deserialize) => deserialize(body, additional_members),
            Self::Custom(serializer) => serializer.deserialize_message(body),
        }
    }
}

/// Declares one handler for messages of type `M` with contexts of type `C`
pub struct MessageHandlerBuilder<M, C, H> {
    name: String,
    context_filter: Predicate<C>,
    body_filter: Predicate<M>,
    deserializer: BodyDeserializer<M>,
    source: HandlerSource<H>,
}

impl<M, C, H> MessageHandlerBuilder<M, C, H>
where
    M: DeserializeOwned + Send + Sync + 'static,
    C: HandlerContext,
    H: MessageHandler<M, C> + 'static,
{
    /// Register a shared handler instance using the default JSON deserialization
    pub fn new(handler: H) -> Self {
        Self::from_source(
            HandlerSource::Shared(Arc::new(handler)),
            BodyDeserializer::Json(deserialize_json::<M>),
        )
    }

    /// Register a factory creating a fresh handler for every routed message
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self::from_source(
            HandlerSource::Scoped(Arc::new(factory)),
            BodyDeserializer::Json(deserialize_json::<M>),
        )
    }
}

impl<M, C, H> MessageHandlerBuilder<M, C, H>
where
    M: Send + Sync + 'static,
    C: HandlerContext,
    H: MessageHandler<M, C> + 'static,
{
    /// Register a handler whose bodies are deserialized by `serializer`
    pub fn with_serializer<S>(handler: H, serializer: S) -> Self
    where
        S: MessageBodySerializer<M> + 'static,
    {
        Self::from_source(
            HandlerSource::Shared(Arc::new(handler)),
            BodyDeserializer::Custom(Arc::new(serializer)),
        )
    }

    fn from_source(source: HandlerSource<H>, deserializer: BodyDeserializer<M>) -> Self {
        Self {
            name: type_name::<H>().to_string(),
            context_filter: Predicate::always(),
            body_filter: Predicate::always(),
            deserializer,
            source,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Only consider contexts accepted by `filter`
    pub fn with_context_filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.context_filter = self.context_filter.and(name, filter);
        self
    }

    /// Only consider deserialized messages accepted by `filter`
    pub fn with_message_body_filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.body_filter = self.body_filter.and(name, filter);
        self
    }

    /// Replace the body deserialization
    pub fn with_message_body_serializer<S>(mut self, serializer: S) -> Self
    where
        S: MessageBodySerializer<M> + 'static,
    {
        self.deserializer = BodyDeserializer::Custom(Arc::new(serializer));
        self
    }

    fn build(self, scope: Predicate<C>) -> MessageHandlerRegistration {
        let has_custom_serializer = matches!(self.deserializer, BodyDeserializer::Custom(_));
        MessageHandlerRegistration {
            name: self.name,
            message_type: type_name::<M>(),
            context_type: type_name::<C>(),
            has_custom_serializer,
            handler: Arc::new(TypedMessageHandler {
                context_filter: scope.and_predicate(self.context_filter),
                body_filter: self.body_filter,
                deserializer: self.deserializer,
                source: self.source,
            }),
        }
    }
}

#[async_trait]
trait ErasedMessageHandler: Send + Sync {
    fn can_process_context(&self, context: &dyn RoutingContext) -> bool;

    fn context_clauses(&self) -> Vec<&str>;

    fn deserialize(
        &self,
        body: &str,
        additional_members: AdditionalMemberHandling,
    ) -> Result<ErasedMessage, DeserializationError>;

    fn can_process_message(&self, message: &dyn Any) -> bool;

    async fn process(
        &self,
        message: ErasedMessage,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

struct TypedMessageHandler<M, C, H> {
    context_filter: Predicate<C>,
    body_filter: Predicate<M>,
    deserializer: BodyDeserializer<M>,
    source: HandlerSource<H>,
}

#[async_trait]
impl<M, C, H> ErasedMessageHandler for TypedMessageHandler<M, C, H>
where
    M: Send + Sync + 'static,
    C: HandlerContext,
    H: MessageHandler<M, C> + 'static,
{
    fn can_process_context(&self, context: &dyn RoutingContext) -> bool {
        C::from_routing_context(context).is_some_and(|context| self.context_filter.evaluate(context))
    }

    fn context_clauses(&self) -> Vec<&str> {
        self.context_filter.clause_names()
    }

    fn deserialize(
        &self,
        body: &str,
        additional_members: AdditionalMemberHandling,
    ) -> Result<ErasedMessage, DeserializationError> {
        let message = self.deserializer.deserialize(body, additional_members)?;
        Ok(Box::new(message))
    }

    fn can_process_message(&self, message: &dyn Any) -> bool {
        message
            .downcast_ref::<M>()
            .is_some_and(|message| self.body_filter.evaluate(message))
    }

    async fn process(
        &self,
        message: ErasedMessage,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let context = C::from_routing_context(context).ok_or_else(|| -> HandlerError {
            format!("context is not a {}", type_name::<C>()).into()
        })?;
        let message = message.downcast::<M>().map_err(|_| -> HandlerError {
            format!("message is not a {}", type_name::<M>()).into()
        })?;

        let handler = self.source.resolve();
        handler
            .process_message(*message, context, correlation, cancellation)
            .await
    }
}

/// A resolved handler registration
#[derive(Clone)]
pub struct MessageHandlerRegistration {
    name: String,
    message_type: &'static str,
    context_type: &'static str,
    has_custom_serializer: bool,
    handler: Arc<dyn ErasedMessageHandler>,
}

impl MessageHandlerRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn context_type(&self) -> &'static str {
        self.context_type
    }

    pub fn has_custom_serializer(&self) -> bool {
        self.has_custom_serializer
    }

    /// Whether the context type, job id and context filter accept `context`
    pub fn can_process_message_based_on_context(&self, context: &dyn RoutingContext) -> bool {
        self.handler.can_process_context(context)
    }

    /// Whether the body filter accepts `message`; `false` for other message types
    pub fn can_process_message_based_on_message<M: Any>(&self, message: &M) -> bool {
        self.handler.can_process_message(message)
    }

    pub(crate) fn try_deserialize(
        &self,
        body: &str,
        additional_members: AdditionalMemberHandling,
    ) -> Result<ErasedMessage, DeserializationError> {
        self.handler.deserialize(body, additional_members)
    }

    pub(crate) fn can_process_erased_message(&self, message: &ErasedMessage) -> bool {
        let message: &(dyn Any + Send + Sync) = &**message;
        self.handler.can_process_message(message)
    }

    pub(crate) async fn process(
        &self,
        message: ErasedMessage,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.handler
            .process(message, context, correlation, cancellation)
            .await
    }
}

impl fmt::Debug for MessageHandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandlerRegistration")
            .field("name", &self.name)
            .field("message_type", &self.message_type)
            .field("context_type", &self.context_type)
            .field("context_filter", &self.handler.context_clauses())
            .finish()
    }
}

#[async_trait]
trait ErasedFallbackHandler: Send + Sync {
    fn can_process_context(&self, context: &dyn RoutingContext) -> bool;

    async fn process(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

struct TypedFallbackHandler<C, F> {
    context_filter: Predicate<C>,
    source: HandlerSource<F>,
}

#[async_trait]
impl<C, F> ErasedFallbackHandler for TypedFallbackHandler<C, F>
where
    C: HandlerContext,
    F: FallbackMessageHandler<C> + 'static,
{
    fn can_process_context(&self, context: &dyn RoutingContext) -> bool {
        C::from_routing_context(context).is_some_and(|context| self.context_filter.evaluate(context))
    }

    async fn process(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let context = C::from_routing_context(context).ok_or_else(|| -> HandlerError {
            format!("context is not a {}", type_name::<C>()).into()
        })?;

        let handler = self.source.resolve();
        handler
            .process_message(body, context, correlation, cancellation)
            .await
    }
}

/// A resolved fallback handler registration
#[derive(Clone)]
pub struct FallbackMessageHandlerRegistration {
    name: String,
    context_type: &'static str,
    context_specific: bool,
    handler: Arc<dyn ErasedFallbackHandler>,
}

impl FallbackMessageHandlerRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_type(&self) -> &'static str {
        self.context_type
    }

    /// Declared for a specific context type rather than [`MessageContext`]
    pub fn is_context_specific(&self) -> bool {
        self.context_specific
    }

    pub fn can_process_message_based_on_context(&self, context: &dyn RoutingContext) -> bool {
        self.handler.can_process_context(context)
    }

    pub(crate) async fn process(
        &self,
        body: &str,
        context: &dyn RoutingContext,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.handler
            .process(body, context, correlation, cancellation)
            .await
    }
}

impl fmt::Debug for FallbackMessageHandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackMessageHandlerRegistration")
            .field("name", &self.name)
            .field("context_type", &self.context_type)
            .field("context_specific", &self.context_specific)
            .finish()
    }
}

/// Registered handlers and fallback handlers, in registration order
#[derive(Debug, Clone, Default)]
pub struct MessageHandlerCollection {
    job_id: Option<String>,
    handlers: Vec<MessageHandlerRegistration>,
    fallback_handlers: Vec<FallbackMessageHandlerRegistration>,
    service_bus_fallback_handlers: Vec<ServiceBusFallbackRegistration>,
}

impl MessageHandlerCollection {
    /// A collection whose handlers see messages of every job
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection whose handlers only see messages received by `job_id`
    pub fn for_job(job_id: impl Into<String>) -> BusrouteResult<Self> {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(BusrouteError::invalid_argument(
                "job id is required to scope a message handler collection",
            ));
        }

        Ok(Self {
            job_id: Some(job_id),
            ..Self::default()
        })
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn with_message_handler<M, C, H>(mut self, handler: MessageHandlerBuilder<M, C, H>) -> Self
    where
        M: Send + Sync + 'static,
        C: HandlerContext,
        H: MessageHandler<M, C> + 'static,
    {
        self.add_message_handler(handler);
        self
    }

    pub fn add_message_handler<M, C, H>(&mut self, handler: MessageHandlerBuilder<M, C, H>)
    where
        M: Send + Sync + 'static,
        C: HandlerContext,
        H: MessageHandler<M, C> + 'static,
    {
        let registration = handler.build(self.job_scope());
        self.handlers.push(registration);
    }

    /// Register a fallback handler receiving the raw message body
    pub fn with_fallback_message_handler<C, F>(self, handler: F) -> Self
    where
        C: HandlerContext,
        F: FallbackMessageHandler<C> + 'static,
    {
        self.with_fallback_source::<C, F>(type_name::<F>(), HandlerSource::Shared(Arc::new(handler)))
    }

    /// Register a fallback handler created fresh for every message
    pub fn with_fallback_message_handler_factory<C, F, Fac>(self, factory: Fac) -> Self
    where
        C: HandlerContext,
        F: FallbackMessageHandler<C> + 'static,
        Fac: Fn() -> F + Send + Sync + 'static,
    {
        self.with_fallback_source::<C, F>(type_name::<F>(), HandlerSource::Scoped(Arc::new(factory)))
    }

    fn with_fallback_source<C, F>(mut self, name: &str, source: HandlerSource<F>) -> Self
    where
        C: HandlerContext,
        F: FallbackMessageHandler<C> + 'static,
    {
        self.fallback_handlers.push(FallbackMessageHandlerRegistration {
            name: name.to_string(),
            context_type: type_name::<C>(),
            context_specific: TypeId::of::<C>() != TypeId::of::<MessageContext>(),
            handler: Arc::new(TypedFallbackHandler {
                context_filter: self.job_scope(),
                source,
            }),
        });
        self
    }

    /// Register a fallback handler receiving the raw Service Bus message; these
    /// run before the body-only fallback handlers
    pub fn with_service_bus_fallback_message_handler<F>(mut self, handler: F) -> Self
    where
        F: ServiceBusFallbackMessageHandler + 'static,
    {
        let registration = ServiceBusFallbackRegistration::new(
            type_name::<F>(),
            Arc::new(handler),
            self.job_scope(),
        );
        self.service_bus_fallback_handlers.push(registration);
        self
    }

    pub fn handlers(&self) -> &[MessageHandlerRegistration] {
        &self.handlers
    }

    pub fn fallback_handlers(&self) -> &[FallbackMessageHandlerRegistration] {
        &self.fallback_handlers
    }

    pub fn service_bus_fallback_handlers(&self) -> &[ServiceBusFallbackRegistration] {
        &self.service_bus_fallback_handlers
    }

    pub fn has_fallback_handlers(&self) -> bool {
        !self.fallback_handlers.is_empty() || !self.service_bus_fallback_handlers.is_empty()
    }

    /// Neither handlers nor fallback handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && !self.has_fallback_handlers()
    }

    /// Predicate requiring the bound job id; match-all when unbound
    fn job_scope<C: HandlerContext>(&self) -> Predicate<C> {
        match &self.job_id {
            Some(job_id) => {
                let expected = job_id.clone();
                Predicate::new(format!("job_id == {job_id}"), move |context: &C| {
                    context.message_context().job_id() == expected
                })
            }
            None => Predicate::always(),
        }
    }
}
