//! Handler contract and the execution context threaded through every attempt.

use crate::dispatcher::DispatcherCore;
use crate::error::{BusResult, DispatchError};
use crate::event::Event;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Business-logic unit that executes events of one registered type.
///
/// Handlers are stateless by contract: the registry's factory produces a
/// fresh instance per event, and nothing may leak shared mutable state
/// across concurrent invocations unless the handler author opts in.
///
/// A handler that returns an error is treated identically to one that
/// crashes inside an isolated worker: a failed attempt, eligible for retry
/// while the event's budget lasts.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Execute one attempt. `ctx.cancellation` fires when the attempt's
    /// deadline expires or the dispatcher shuts down; long-running handler
    /// bodies should select against it.
    async fn call(&self, ctx: &ExecutionContext, event: &Event) -> BusResult<Value>;
}

/// Factory producing a fresh handler per event.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// Per-attempt context, passed explicitly rather than as ambient state.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Id of the event being executed
    pub event_id: Uuid,

    /// 1-based attempt number within the event's attempt sequence
    pub attempt: u32,

    /// Cancelled when the attempt deadline expires, the event is cancelled
    /// by id, or the dispatcher shuts down
    pub cancellation: CancellationToken,

    /// Handle back to the dispatcher, so handlers can submit follow-up
    /// events for chained workflows
    pub dispatcher: DispatcherHandle,

    /// Caller-supplied correlation data, passed through unmodified
    pub correlation: HashMap<String, Value>,
}

/// Weak handle to the dispatcher, safe to hold inside handlers.
///
/// Submissions fail with [`DispatchError::ShuttingDown`] once the dispatcher
/// is gone, so a chained workflow racing a shutdown degrades to an error
/// value rather than a hang.
#[derive(Clone)]
pub struct DispatcherHandle {
    core: Weak<DispatcherCore>,
}

impl DispatcherHandle {
    pub(crate) fn new(core: Weak<DispatcherCore>) -> Self {
        Self { core }
    }

    /// Handle that is not connected to any dispatcher. Used on the worker
    /// side of the isolated-process protocol, where follow-up submission is
    /// not available.
    pub fn detached() -> Self {
        Self { core: Weak::new() }
    }

    /// Submit a follow-up event to the owning dispatcher.
    pub async fn submit(&self, event: Event) -> BusResult<Uuid> {
        match self.core.upgrade() {
            Some(core) => DispatcherCore::submit_internal(&core, event, HashMap::new()).await,
            None => Err(DispatchError::ShuttingDown),
        }
    }
}

/// Adapt a plain constructor closure into a [`HandlerFactory`].
pub fn factory<H, F>(make: F) -> HandlerFactory
where
    H: Handler + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    Arc::new(move || Arc::new(make()) as Arc<dyn Handler>)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
            Ok(event.payload.clone())
        }
    }

    #[tokio::test]
    async fn detached_handle_refuses_submission() {
        let handle = DispatcherHandle::detached();
        let event = Event::builder("echo").build().unwrap();
        assert_eq!(
            handle.submit(event).await.unwrap_err(),
            DispatchError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn factory_produces_fresh_instances() {
        let make = factory(|| Echo);
        let a = make();
        let b = make();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
