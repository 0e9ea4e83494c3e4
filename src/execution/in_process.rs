//! INLINE and POOLED execution: the handler future runs in this process,
//! raced against the event's deadline.

use crate::error::{BusResult, DispatchError};
use crate::event::Event;
use crate::handler::{ExecutionContext, Handler};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Run one in-process attempt under the event's timeout.
///
/// On timeout the attempt's cancellation token is cancelled and the handler
/// future is dropped, which stops it at its next await point. A handler
/// body that blocks without yielding cannot be preempted; it is reported as
/// timed out while its thread keeps running (INLINE's documented
/// limitation).
///
/// With `catch_panics` (POOLED), a panicking handler is converted into a
/// `HandlerFailed` attempt instead of unwinding the worker task.
pub(crate) async fn run_attempt(
    handler: Arc<dyn Handler>,
    ctx: &ExecutionContext,
    event: &Event,
    catch_panics: bool,
) -> BusResult<Value> {
    let call = async {
        if catch_panics {
            match AssertUnwindSafe(handler.call(ctx, event)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(DispatchError::HandlerFailed {
                    event_id: event.id,
                    reason: format!("handler panicked: {}", panic_message(panic.as_ref())),
                }),
            }
        } else {
            handler.call(ctx, event).await
        }
    };

    match tokio::time::timeout(event.timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            ctx.cancellation.cancel();
            Err(DispatchError::AttemptTimeout {
                event_id: event.id,
                timeout: event.timeout,
            })
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
