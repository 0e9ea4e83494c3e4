//! Handlers shared across the integration suites.

use eventbus_core::{factory, BusResult, DispatchError, Dispatcher, Event, ExecutionContext, Handler};
use eventbus_core::HandlerRegistry;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns the event payload unchanged.
pub struct Echo;

#[async_trait::async_trait]
impl Handler for Echo {
    async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
        Ok(event.payload.clone())
    }
}

/// Fails every attempt, counting calls so tests can assert attempt totals.
pub struct AlwaysFails {
    pub calls: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl Handler for AlwaysFails {
    async fn call(&self, ctx: &ExecutionContext, _event: &Event) -> BusResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DispatchError::HandlerFailed {
            event_id: ctx.event_id,
            reason: "synthetic failure".to_string(),
        })
    }
}

/// Sleeps far past any test timeout, honoring the cancellation token.
pub struct Sleepy;

#[async_trait::async_trait]
impl Handler for Sleepy {
    async fn call(&self, ctx: &ExecutionContext, _event: &Event) -> BusResult<Value> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(Value::Null),
            _ = ctx.cancellation.cancelled() => Err(DispatchError::Cancelled {
                event_id: ctx.event_id,
            }),
        }
    }
}

/// Dispatcher with only the echo handler registered, on default config.
pub async fn echo_dispatcher() -> Dispatcher {
    let registry = HandlerRegistry::new();
    registry.register("echo", factory(|| Echo)).await.unwrap();
    Dispatcher::with_defaults(registry).unwrap()
}
