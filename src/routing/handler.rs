//! # Message Handlers
//!
//! Traits implemented by application code to process routed messages, and the
//! per-message resolution of handler instances.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::messaging::{HandlerContext, MessageContext, MessageCorrelationInfo};

/// Processes messages of type `M` received with a context of type `C`.
///
/// Returning `Ok(())` reports the message as processed. Returning an error
/// reports the handler as failed; the router then continues with the next
/// matching handler.
#[async_trait]
pub trait MessageHandler<M, C = MessageContext>: Send + Sync
where
    M: Send + 'static,
    C: HandlerContext,
{
    async fn process_message(
        &self,
        message: M,
        context: &C,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Last-resort handler receiving the raw body of a message no regular handler
/// processed
#[async_trait]
pub trait FallbackMessageHandler<C = MessageContext>: Send + Sync
where
    C: HandlerContext,
{
    async fn process_message(
        &self,
        body: &str,
        context: &C,
        correlation: &MessageCorrelationInfo,
        cancellation: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Where the handler instance for a message comes from
pub(crate) enum HandlerSource<H> {
    /// One instance shared by every message
    Shared(Arc<H>),
    /// A fresh instance per routed message
    Scoped(Arc<dyn Fn() -> H + Send + Sync>),
}

impl<H> HandlerSource<H> {
    pub(crate) fn resolve(&self) -> Arc<H> {
        match self {
            Self::Shared(handler) => Arc::clone(handler),
            Self::Scoped(factory) => Arc::new(factory()),
        }
    }

    pub(crate) fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped(_))
    }
}

impl<H> Clone for HandlerSource<H> {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(handler) => Self::Shared(Arc::clone(handler)),
            Self::Scoped(factory) => Self::Scoped(Arc::clone(factory)),
        }
    }
}

impl<H> fmt::Debug for HandlerSource<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifetime = if self.is_scoped() { "Scoped" } else { "Shared" };
        write!(f, "{lifetime}({})", std::any::type_name::<H>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(usize);

    #[test]
    fn test_scoped_source_creates_fresh_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let source = HandlerSource::<Counter>::Scoped(Arc::new(move || {
            Counter(counter.fetch_add(1, Ordering::SeqCst))
        }));

        assert!(source.is_scoped());
        assert_eq!(source.resolve().0, 0);
        assert_eq!(source.resolve().0, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shared_source_reuses_instance() {
        let source = HandlerSource::Shared(Arc::new(Counter(7)));
        let first = source.resolve();
        let second = source.resolve();

        assert!(!source.is_scoped());
        assert!(Arc::ptr_eq(&first, &second));
    }
}
