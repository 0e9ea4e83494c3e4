//! Terminal outcomes and batch-retrieval metadata.

use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Terminal outcome of one event, produced exactly once after the attempt
/// sequence ends (success, or failure with no retries left).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Back-reference to the originating event
    pub event_id: Uuid,

    /// Whether the final attempt succeeded
    pub success: bool,

    /// Handler output on success
    pub data: Option<Value>,

    /// Stable error kind on failure ("TimeoutError", "HandlerError", ...)
    pub error_kind: Option<String>,

    /// Last attempt's error detail on failure
    pub error_message: Option<String>,

    /// Total attempts executed (1..=retry_budget+1)
    pub attempts: u32,

    /// When the terminal outcome was recorded
    pub completed_at: DateTime<Utc>,
}

impl DispatchResult {
    pub fn success(event_id: Uuid, data: Value, attempts: u32) -> Self {
        Self {
            event_id,
            success: true,
            data: Some(data),
            error_kind: None,
            error_message: None,
            attempts,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(event_id: Uuid, error: &DispatchError, attempts: u32) -> Self {
        Self {
            event_id,
            success: false,
            data: None,
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            attempts,
            completed_at: Utc::now(),
        }
    }
}

/// Per-id status inside batch metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStatus {
    Success,
    Failed,
}

/// Summary returned alongside `await_results`, enabling partial-success
/// batch reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub total_requested: usize,
    pub successful: usize,
    pub failed: usize,
    pub per_id: HashMap<Uuid, IdStatus>,
    pub timestamp: DateTime<Utc>,
}

impl BatchMetadata {
    /// Build metadata from the terminal results gathered for a request.
    pub fn from_results(requested: &[Uuid], results: &HashMap<Uuid, DispatchResult>) -> Self {
        let mut per_id = HashMap::with_capacity(results.len());
        let mut successful = 0;
        let mut failed = 0;
        for result in results.values() {
            if result.success {
                successful += 1;
                per_id.insert(result.event_id, IdStatus::Success);
            } else {
                failed += 1;
                per_id.insert(result.event_id, IdStatus::Failed);
            }
        }
        Self {
            total_requested: requested.len(),
            successful,
            failed,
            per_id,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn failed_results_always_carry_kind_and_message() {
        let id = Uuid::new_v4();
        let result = DispatchResult::failure(
            id,
            &DispatchError::AttemptTimeout {
                event_id: id,
                timeout: Duration::from_secs(2),
            },
            3,
        );
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("TimeoutError"));
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty()));
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn successful_results_carry_data_and_no_error() {
        let id = Uuid::new_v4();
        let result = DispatchResult::success(id, json!({"msg": "hi"}), 1);
        assert!(result.success);
        assert_eq!(result.data.unwrap()["msg"], "hi");
        assert!(result.error_kind.is_none());
        assert!(result.error_message.is_none());
    }

    #[test]
    fn batch_metadata_counts_partial_success() {
        let ok = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let mut results = HashMap::new();
        results.insert(ok, DispatchResult::success(ok, json!({}), 1));
        results.insert(
            bad,
            DispatchResult::failure(
                bad,
                &DispatchError::HandlerFailed {
                    event_id: bad,
                    reason: "nope".into(),
                },
                1,
            ),
        );

        let meta = BatchMetadata::from_results(&[ok, bad, missing], &results);
        assert_eq!(meta.total_requested, 3);
        assert_eq!(meta.successful, 1);
        assert_eq!(meta.failed, 1);
        assert_eq!(meta.per_id[&ok], IdStatus::Success);
        assert_eq!(meta.per_id[&bad], IdStatus::Failed);
        assert!(!meta.per_id.contains_key(&missing));
    }
}
