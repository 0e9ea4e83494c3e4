//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and
//! files for debugging concurrent dispatch flows.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::event::ExecutionStrategy;
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        if !log_dir.exists() {
            fs::create_dir_all(&log_dir).expect("Failed to create log directory");
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(EnvFilter::new(log_level.clone())),
            )
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            );

        // A global subscriber may already be set by the embedding process;
        // not an error, keep whichever got there first.
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // Keep the non-blocking writer alive for the process lifetime.
        std::mem::forget(guard);
    });
}

fn get_environment() -> String {
    std::env::var("EVENTBUS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log one submission.
pub fn log_submit(event_id: Uuid, event_type: &str, strategy: ExecutionStrategy, priority: i32) {
    tracing::info!(
        event_id = %event_id,
        event_type = %event_type,
        strategy = %strategy,
        priority = priority,
        timestamp = %Utc::now().to_rfc3339(),
        "📨 EVENT_SUBMITTED"
    );
}

/// Log a retryable failure being re-queued for another attempt.
pub fn log_retry(
    event_id: Uuid,
    event_type: &str,
    strategy: ExecutionStrategy,
    attempt: u32,
    error: &str,
) {
    tracing::warn!(
        event_id = %event_id,
        event_type = %event_type,
        strategy = %strategy,
        attempt = attempt,
        error = %error,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 EVENT_RETRY"
    );
}

/// Log a terminal outcome.
pub fn log_terminal(
    event_id: Uuid,
    event_type: &str,
    strategy: ExecutionStrategy,
    success: bool,
    attempts: u32,
    duration_ms: Option<u64>,
    error_kind: Option<&str>,
) {
    if success {
        tracing::info!(
            event_id = %event_id,
            event_type = %event_type,
            strategy = %strategy,
            outcome = "succeeded",
            attempts = attempts,
            duration_ms = duration_ms,
            timestamp = %Utc::now().to_rfc3339(),
            "✅ EVENT_COMPLETED"
        );
    } else {
        tracing::warn!(
            event_id = %event_id,
            event_type = %event_type,
            strategy = %strategy,
            outcome = "failed",
            attempts = attempts,
            duration_ms = duration_ms,
            error_kind = error_kind,
            timestamp = %Utc::now().to_rfc3339(),
            "❌ EVENT_COMPLETED"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_mapping() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("test"), "debug");
    }
}
