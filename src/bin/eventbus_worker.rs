//! Reference isolated-execution worker.
//!
//! Reads line-delimited JSON requests on stdin, executes the registered
//! handler, and writes one JSON response line per request on stdout.
//! Logging goes to stderr since stdout carries the protocol.

use eventbus_core::{factory, worker_main, BusResult, Event, ExecutionContext, Handler};
use eventbus_core::{DispatchError, HandlerRegistry};
use serde_json::{json, Value};

/// Returns the event payload unchanged.
struct Echo;

#[async_trait::async_trait]
impl Handler for Echo {
    async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
        Ok(event.payload.clone())
    }
}

/// Doubles the integer under `"x"` in the payload.
struct Double;

#[async_trait::async_trait]
impl Handler for Double {
    async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
        let x = event.payload["x"]
            .as_i64()
            .ok_or_else(|| DispatchError::HandlerFailed {
                event_id: event.id,
                reason: "payload missing integer field 'x'".to_string(),
            })?;
        Ok(json!({ "x*2": x * 2 }))
    }
}

/// Sleeps for `"sleep_ms"` milliseconds, then echoes. Used to exercise
/// timeout handling across the process boundary.
struct Sleeper;

#[async_trait::async_trait]
impl Handler for Sleeper {
    async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
        let ms = event.payload["sleep_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        Ok(event.payload.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let registry = HandlerRegistry::new();
    registry.register("echo", factory(|| Echo)).await?;
    registry.register("double", factory(|| Double)).await?;
    registry.register("sleep", factory(|| Sleeper)).await?;

    worker_main(registry).await?;
    Ok(())
}
