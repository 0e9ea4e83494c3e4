//! # Handler Registry
//!
//! Thread-safe mapping from an event-type tag to the factory that produces
//! handler instances for that type.
//!
//! Registration is expected at startup, but resolution is safe against a
//! racing registration: both sides go through one `RwLock`. Registering a
//! type twice fails fast with [`DispatchError::DuplicateType`] and leaves
//! the original factory bound.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventbus_core::registry::HandlerRegistry;
//! use eventbus_core::handler::factory;
//! # use eventbus_core::handler::{ExecutionContext, Handler};
//! # use eventbus_core::event::Event;
//! # use eventbus_core::error::BusResult;
//! # use serde_json::Value;
//! # struct EchoHandler;
//! # #[async_trait::async_trait]
//! # impl Handler for EchoHandler {
//! #     async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
//! #         Ok(event.payload.clone())
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::new();
//! registry.register("echo", factory(|| EchoHandler)).await?;
//!
//! let handler = registry.resolve("echo").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BusResult, DispatchError};
use crate::handler::{Handler, HandlerFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry statistics snapshot.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_types: usize,
    pub types: Vec<String>,
}

/// Maps event-type tags to handler factories.
pub struct HandlerRegistry {
    factories: RwLock<HashMap<String, HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a factory to an event type. Fails with `DuplicateType` if the
    /// type is already bound; the original factory remains in place.
    pub async fn register(
        &self,
        event_type: impl Into<String>,
        factory: HandlerFactory,
    ) -> BusResult<()> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(DispatchError::InvalidEvent {
                reason: "event type cannot be empty".to_string(),
            });
        }

        let mut factories = self.factories.write().await;
        if factories.contains_key(&event_type) {
            return Err(DispatchError::DuplicateType { event_type });
        }
        factories.insert(event_type.clone(), factory);
        info!(event_type = %event_type, "Handler registered");
        Ok(())
    }

    /// Produce a fresh handler instance for the given type.
    pub async fn resolve(&self, event_type: &str) -> BusResult<Arc<dyn Handler>> {
        let factories = self.factories.read().await;
        match factories.get(event_type) {
            Some(factory) => {
                debug!(event_type, "Handler resolved");
                Ok(factory())
            }
            None => Err(DispatchError::UnknownType {
                event_type: event_type.to_string(),
            }),
        }
    }

    /// Whether a factory is bound for the given type.
    pub async fn contains(&self, event_type: &str) -> bool {
        self.factories.read().await.contains_key(event_type)
    }

    /// All registered type tags, sorted.
    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn stats(&self) -> RegistryStats {
        let types = self.registered_types().await;
        RegistryStats {
            total_types: types.len(),
            types,
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
