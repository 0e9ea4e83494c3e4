//! Error types for the event dispatch core.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the dispatcher, registry, and execution strategies.
///
/// Caller mistakes (`UnknownType`, `DuplicateType`, `InvalidEvent`) are
/// returned synchronously at the point of the mistake and never retried.
/// Attempt failures (`AttemptTimeout`, `HandlerFailed`, `IsolationFault`,
/// `ExternalCommandFailed`) are retried internally up to the event's retry
/// budget and only surface through the terminal [`DispatchResult`].
///
/// [`DispatchResult`]: crate::result::DispatchResult
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Submit or resolve against a type with no registered handler factory
    #[error("No handler registered for event type '{event_type}'")]
    UnknownType { event_type: String },

    /// Second registration for an already-bound type; the original stays bound
    #[error("Handler already registered for event type '{event_type}'")]
    DuplicateType { event_type: String },

    /// Event failed construction-time validation
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// One attempt exceeded the event's timeout
    #[error("Attempt for event {event_id} timed out after {timeout:?}")]
    AttemptTimeout { event_id: Uuid, timeout: Duration },

    /// Handler returned a domain failure (or panicked in a pooled attempt)
    #[error("Handler failed for event {event_id}: {reason}")]
    HandlerFailed { event_id: Uuid, reason: String },

    /// Child process crashed, could not be launched, or broke protocol
    #[error("Isolated execution fault for event {event_id}: {reason}")]
    IsolationFault { event_id: Uuid, reason: String },

    /// External command exited non-zero or could not be launched
    #[error("External command failed for event {event_id} (exit code {exit_code:?}): {stderr}")]
    ExternalCommandFailed {
        event_id: Uuid,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Event was cancelled by id before reaching a natural terminal state
    #[error("Event {event_id} was cancelled")]
    Cancelled { event_id: Uuid },

    /// Operation raced with or followed `Dispatcher::shutdown`
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// Configuration load or validation failure
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl DispatchError {
    /// Stable error-kind string recorded on failed terminal results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownType { .. } => "UnknownTypeError",
            Self::DuplicateType { .. } => "DuplicateTypeError",
            Self::InvalidEvent { .. } => "InvalidEventError",
            Self::AttemptTimeout { .. } => "TimeoutError",
            Self::HandlerFailed { .. } => "HandlerError",
            Self::IsolationFault { .. } => "IsolationFaultError",
            Self::ExternalCommandFailed { .. } => "ExternalCommandError",
            Self::Cancelled { .. } => "Cancelled",
            Self::ShuttingDown => "ShutdownError",
            Self::Configuration { .. } => "ConfigurationError",
        }
    }

    /// Whether a failed attempt with this error is eligible for another
    /// attempt while the event still has retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AttemptTimeout { .. }
                | Self::HandlerFailed { .. }
                | Self::IsolationFault { .. }
                | Self::ExternalCommandFailed { .. }
        )
    }
}

pub type BusResult<T> = std::result::Result<T, DispatchError>;
