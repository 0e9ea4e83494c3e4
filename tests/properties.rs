//! Property checks over the data model and retry timing.

use eventbus_core::{
    DispatchError, DispatchResult, Event, ExecutionStrategy, RetryBackoffConfig,
};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

fn strategy_strategy() -> impl Strategy<Value = ExecutionStrategy> {
    prop_oneof![
        Just(ExecutionStrategy::Inline),
        Just(ExecutionStrategy::Pooled),
        Just(ExecutionStrategy::Isolated),
        Just(ExecutionStrategy::External),
    ]
}

proptest! {
    #[test]
    fn events_survive_a_json_round_trip(
        event_type in "[a-z][a-z._-]{0,30}",
        priority in -100i32..100,
        timeout_ms in 1u64..600_000,
        retry_budget in 0u32..20,
        strategy in strategy_strategy(),
        key in "[a-z]{1,8}",
        value in -1_000_000i64..1_000_000,
    ) {
        let event = Event::builder(&event_type)
            .priority(priority)
            .timeout(Duration::from_millis(timeout_ms))
            .retry_budget(retry_budget)
            .strategy(strategy)
            .payload(json!({ key.clone(): value }))
            .build()
            .unwrap();

        let decoded: Event =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        prop_assert_eq!(decoded.id, event.id);
        prop_assert_eq!(decoded.event_type, event.event_type);
        prop_assert_eq!(decoded.priority, priority);
        prop_assert_eq!(decoded.retry_budget, retry_budget);
        prop_assert_eq!(decoded.strategy, strategy);
        prop_assert_eq!(&decoded.payload[&key], &json!(value));
    }

    #[test]
    fn fresh_copies_share_everything_but_the_id(
        priority in -100i32..100,
        retry_budget in 0u32..20,
    ) {
        let template = Event::builder("tick")
            .priority(priority)
            .retry_budget(retry_budget)
            .build()
            .unwrap();
        let copy = template.from_template();
        prop_assert_ne!(copy.id, template.id);
        prop_assert_eq!(copy.event_type, template.event_type);
        prop_assert_eq!(copy.priority, template.priority);
        prop_assert_eq!(copy.retry_budget, template.retry_budget);
    }

    #[test]
    fn backoff_delays_never_exceed_the_cap_and_never_shrink(
        base in 1u64..1_000,
        multiplier in 1.0f64..4.0,
        cap in 1u64..60_000,
        attempt in 2u32..12,
    ) {
        let backoff = RetryBackoffConfig {
            enabled: true,
            base_delay_ms: base,
            multiplier,
            max_delay_ms: cap,
        };
        let current = backoff.delay_before_attempt(attempt).unwrap();
        let next = backoff.delay_before_attempt(attempt + 1).unwrap();
        prop_assert!(current.as_millis() as u64 <= cap);
        prop_assert!(next >= current || next.as_millis() as u64 == cap);
    }

    #[test]
    fn failed_results_always_explain_themselves(reason in ".{1,64}") {
        let id = Uuid::new_v4();
        let result = DispatchResult::failure(
            id,
            &DispatchError::HandlerFailed {
                event_id: id,
                reason: reason.clone(),
            },
            1,
        );
        prop_assert!(!result.success);
        prop_assert!(!result.error_kind.as_deref().unwrap().is_empty());
        prop_assert!(result.error_message.as_deref().unwrap().contains(&reason));
    }
}
