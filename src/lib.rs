//! # eventbus-core
//!
//! Asynchronous event dispatch: typed events routed to registered handlers
//! and executed under configurable isolation strategies, with priority
//! ordering, per-event timeouts, bounded retries, and batch result
//! collection.
//!
//! ## Key Features
//!
//! - **Typed handler registry**: one factory per event type, duplicate
//!   registration rejected, unknown types rejected at submission.
//! - **Four execution strategies**: `INLINE` (submitter's task), `POOLED`
//!   (bounded tokio worker pool), `ISOLATED` (pool of child worker
//!   processes), `EXTERNAL` (arbitrary command, exit code as outcome).
//! - **Priority dispatch**: higher priority first, FIFO within a priority,
//!   even when pools are saturated.
//! - **Retry policy**: retryable failures re-run up to `retry_budget`
//!   times; callers only ever see the terminal outcome.
//! - **Lifecycle events**: broadcast notifications for submission, retry,
//!   and completion.
//! - **Scheduler**: one-shot and fixed-interval resubmission through the
//!   normal dispatch path.
//!
//! ## Usage
//!
//! ```no_run
//! use eventbus_core::{factory, Dispatcher, Handler, HandlerRegistry};
//! use eventbus_core::{BusResult, Event, ExecutionContext};
//! use serde_json::{json, Value};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Handler for Greeter {
//!     async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
//!         Ok(json!({ "greeting": format!("hello, {}", event.payload["name"]) }))
//!     }
//! }
//!
//! # async fn demo() -> BusResult<()> {
//! let registry = HandlerRegistry::new();
//! registry.register("greet", factory(|| Greeter)).await?;
//!
//! let dispatcher = Dispatcher::with_defaults(registry)?;
//! let event = Event::builder("greet")
//!     .payload(json!({"name": "world"}))
//!     .build()?;
//! let id = dispatcher.submit(event).await?;
//! let (results, _meta) = dispatcher.await_results(&[id]).await;
//! assert!(results[&id].success);
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod execution;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod result;
pub mod scheduler;

pub use config::{DispatcherConfig, IsolatedPoolConfig, PoolConfig, RetryBackoffConfig};
pub use dispatcher::{Dispatcher, DispatcherStats, LifecycleEvent};
pub use error::{BusResult, DispatchError};
pub use event::{Event, EventBuilder, EventState, ExecutionStrategy};
pub use execution::isolated::worker_main;
pub use handler::{factory, DispatcherHandle, ExecutionContext, Handler, HandlerFactory};
pub use logging::init_structured_logging;
pub use registry::{HandlerRegistry, RegistryStats};
pub use result::{BatchMetadata, DispatchResult, IdStatus};
pub use scheduler::Scheduler;
