//! Execution strategies: how one attempt of an event actually runs.
//!
//! The dispatcher decides *where* an attempt runs (the submitting task, a
//! pooled tokio task) and owns pool capacity; this module decides *how* a
//! single attempt executes under its strategy and converts every failure
//! mode into an error value.

pub mod external;
pub mod in_process;
pub mod isolated;

use crate::error::BusResult;
use crate::event::{Event, ExecutionStrategy};
use crate::handler::ExecutionContext;
use crate::registry::HandlerRegistry;
use isolated::IsolatedPool;
use serde_json::Value;

/// Run exactly one attempt of `event` under its strategy, honoring the
/// event's timeout. Never panics outward: pooled handler panics, child
/// process crashes, and command launch failures all come back as `Err`.
pub(crate) async fn execute_attempt(
    registry: &HandlerRegistry,
    isolated_pool: &IsolatedPool,
    ctx: &ExecutionContext,
    event: &Event,
) -> BusResult<Value> {
    match event.strategy {
        ExecutionStrategy::Inline => {
            let handler = registry.resolve(&event.event_type).await?;
            in_process::run_attempt(handler, ctx, event, false).await
        }
        ExecutionStrategy::Pooled => {
            let handler = registry.resolve(&event.event_type).await?;
            in_process::run_attempt(handler, ctx, event, true).await
        }
        ExecutionStrategy::Isolated => isolated_pool.execute(event, ctx.attempt).await,
        ExecutionStrategy::External => external::execute(event).await,
    }
}
