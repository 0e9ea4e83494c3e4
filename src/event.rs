//! Event data model: the immutable description of one unit of work.

use crate::error::{BusResult, DispatchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Execution/isolation mode an event is run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Execute synchronously on the submitting task, before `submit` returns.
    ///
    /// The timeout races the handler future against a deadline; a handler
    /// body that never yields and ignores its cancellation token cannot be
    /// preempted, only reported as timed out.
    Inline,
    /// Hand off to the bounded tokio worker pool; `submit` returns immediately.
    Pooled,
    /// Run in a separate worker process; crashes never reach the dispatcher.
    Isolated,
    /// Invoke an external executable described by the payload.
    External,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Pooled => write!(f, "pooled"),
            Self::Isolated => write!(f, "isolated"),
            Self::External => write!(f, "external"),
        }
    }
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "pooled" => Ok(Self::Pooled),
            "isolated" => Ok(Self::Isolated),
            "external" => Ok(Self::External),
            _ => Err(format!("Invalid execution strategy: {s}")),
        }
    }
}

/// Lifecycle state of an event inside the dispatcher.
///
/// `Pending -> Running -> (Succeeded | FailedRetryable -> Pending | FailedTerminal)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Queued (or re-queued after a retryable failure), not yet executing
    Pending,
    /// An attempt is currently executing
    Running,
    /// Terminal: an attempt succeeded
    Succeeded,
    /// An attempt failed with retry budget remaining
    FailedRetryable,
    /// Terminal: all attempts exhausted, or failure was not retryable
    FailedTerminal,
}

impl EventState {
    /// Terminal states are the only ones exposed through `await_results`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedRetryable => write!(f, "failed_retryable"),
            Self::FailedTerminal => write!(f, "failed_terminal"),
        }
    }
}

/// One unit of submitted work, immutable after construction.
///
/// Built through [`EventBuilder`], which validates at construction time
/// rather than at submission. Serializable because ISOLATED execution moves
/// the event across a process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier, assigned at construction
    pub id: Uuid,

    /// Type tag used to resolve a handler
    pub event_type: String,

    /// Opaque key/value payload passed to the handler unmodified
    pub payload: Value,

    /// Execution strategy for every attempt of this event
    pub strategy: ExecutionStrategy,

    /// Higher values dequeue first; ties break by submission order
    pub priority: i32,

    /// Wall-clock bound for one execution attempt
    pub timeout: Duration,

    /// Additional attempts permitted after the first failure
    pub retry_budget: u32,
}

impl Event {
    /// Start building an event of the given type.
    pub fn builder(event_type: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_type)
    }

    /// Clone this event as a template with a freshly minted id.
    ///
    /// Used by the scheduler: every resubmission of a template must get its
    /// own id, since the result table holds exactly one terminal result per id.
    pub fn from_template(&self) -> Event {
        Event {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

/// Builder for [`Event`]; `build` rejects invalid values immediately.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: String,
    payload: Value,
    strategy: ExecutionStrategy,
    priority: i32,
    timeout: Duration,
    retry_budget: u32,
}

impl EventBuilder {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Value::Object(serde_json::Map::new()),
            strategy: ExecutionStrategy::Pooled,
            priority: 0,
            timeout: Duration::from_secs(30),
            retry_budget: 0,
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Validate and construct the event.
    pub fn build(self) -> BusResult<Event> {
        if self.event_type.trim().is_empty() {
            return Err(DispatchError::InvalidEvent {
                reason: "event type cannot be empty".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(DispatchError::InvalidEvent {
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        if !self.payload.is_object() {
            return Err(DispatchError::InvalidEvent {
                reason: "payload must be a JSON object".to_string(),
            });
        }

        Ok(Event {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            payload: self.payload,
            strategy: self.strategy,
            priority: self.priority,
            timeout: self.timeout,
            retry_budget: self.retry_budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_assigns_unique_ids() {
        let a = Event::builder("echo").build().unwrap();
        let b = Event::builder("echo").build().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn builder_rejects_empty_type() {
        let err = Event::builder("  ").build().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEvent { .. }));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = Event::builder("echo")
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEvent { .. }));
    }

    #[test]
    fn builder_rejects_non_object_payload() {
        let err = Event::builder("echo").payload(json!([1, 2])).build().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEvent { .. }));
    }

    #[test]
    fn template_clone_mints_a_new_id() {
        let template = Event::builder("tick").priority(3).build().unwrap();
        let fired = template.from_template();
        assert_ne!(template.id, fired.id);
        assert_eq!(template.priority, fired.priority);
        assert_eq!(template.event_type, fired.event_type);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::builder("double")
            .payload(json!({"x": 5}))
            .strategy(ExecutionStrategy::Isolated)
            .timeout(Duration::from_secs(5))
            .retry_budget(2)
            .build()
            .unwrap();
        let wire = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.strategy, ExecutionStrategy::Isolated);
        assert_eq!(back.timeout, Duration::from_secs(5));
        assert_eq!(back.payload["x"], 5);
    }

    #[test]
    fn strategy_parses_from_str() {
        assert_eq!(
            "isolated".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::Isolated
        );
        assert!("mystery".parse::<ExecutionStrategy>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(EventState::Succeeded.is_terminal());
        assert!(EventState::FailedTerminal.is_terminal());
        assert!(!EventState::Pending.is_terminal());
        assert!(!EventState::Running.is_terminal());
        assert!(!EventState::FailedRetryable.is_terminal());
    }
}
