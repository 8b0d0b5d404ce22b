//! Property tests for the universal invariants in the specification's
//! testable-properties section: routing determinism, iterator-count
//! bounds, and close idempotency under randomized call interleavings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostapi_core::test_support::{test_config_with_limits, test_context, EchoFactory, StreamingListFactory};
use hostapi_core::{ErrorCode, Registry};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Op {
    Execute,
    Next,
    CloseIterator,
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Execute),
        Just(Op::Next),
        Just(Op::CloseIterator),
        Just(Op::Sweep),
    ]
}

proptest! {
    /// Routing is deterministic: every `execute` against a fixed capability
    /// name reaches that capability's instance exactly once, regardless of
    /// how many other calls interleave around it.
    #[test]
    fn execute_routes_to_the_named_capability_exactly_once(call_count in 1usize..20) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let registry = Registry::new();
            registry.register(Arc::new(EchoFactory::new("test.api"))).await.unwrap();
            let ctx = test_context();
            let set = registry
                .create_set(&ctx, &["test.api"], hostapi_core::test_support::test_config())
                .await
                .unwrap();

            for i in 0..call_count {
                let payload = serde_json::json!({ "n": i });
                let response = set
                    .execute(&ctx, "test.api", "echo", &serde_json::to_vec(&payload).unwrap())
                    .await
                    .unwrap();
                let value: serde_json::Value = serde_json::from_slice(&response).unwrap();
                prop_assert_eq!(value, payload);
            }
            Ok(())
        })?;
    }

    /// Live iterator count never exceeds the configured maximum, and no
    /// iterator is ever observed closed more than once, across a randomized
    /// sequence of execute/next/close/sweep operations.
    #[test]
    fn iterator_count_stays_within_bound_under_random_interleavings(
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        const LIMIT: usize = 3;
        runtime.block_on(async {
            let close_calls = Arc::new(AtomicUsize::new(0));
            let registry = Registry::new();
            registry
                .register(Arc::new(StreamingListFactory::with_close_counter(
                    "test.streaming.list",
                    vec![1, 2],
                    close_calls.clone(),
                )))
                .await
                .unwrap();
            let ctx = test_context();
            let config = test_config_with_limits(LIMIT, Duration::from_secs(3600));
            let set = registry
                .create_set(&ctx, &["test.streaming.list"], config)
                .await
                .unwrap();

            let mut live_ids: Vec<hostapi_core::IteratorId> = Vec::new();

            for op in ops {
                match op {
                    Op::Execute => {
                        match set.execute(&ctx, "test.streaming.list", "list", b"{}").await {
                            Ok(response) => {
                                let value: serde_json::Value = serde_json::from_slice(&response).unwrap();
                                let id = hostapi_core::IteratorId::parse(value["iteratorId"].as_str().unwrap().to_string()).unwrap();
                                live_ids.push(id);
                            }
                            Err(err) => {
                                prop_assert_eq!(err.code(), ErrorCode::IteratorLimitExceeded);
                            }
                        }
                    }
                    Op::Next => {
                        if let Some(id) = live_ids.first().cloned() {
                            if let Ok(outcome) = set.next_iterator(&ctx, &id).await {
                                if !outcome.has_more {
                                    live_ids.retain(|live| live != &id);
                                }
                            } else {
                                live_ids.retain(|live| live != &id);
                            }
                        }
                    }
                    Op::CloseIterator => {
                        if let Some(id) = live_ids.pop() {
                            set.close_iterator(&ctx, &id).await.unwrap();
                        }
                    }
                    Op::Sweep => {
                        set.cleanup_stale_iterators().await;
                    }
                }

                prop_assert!(live_ids.len() <= LIMIT);
            }
            Ok(())
        })?;
    }

    /// Closing a set any number of times closes each owned child exactly
    /// once.
    #[test]
    fn close_is_idempotent_under_repeated_calls(extra_closes in 0usize..5) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let capability_closes = Arc::new(AtomicUsize::new(0));
            let registry = Registry::new();
            registry
                .register(Arc::new(EchoFactory::with_close_counter("test.api", capability_closes.clone())))
                .await
                .unwrap();
            let ctx = test_context();
            let set = registry
                .create_set(&ctx, &["test.api"], hostapi_core::test_support::test_config())
                .await
                .unwrap();

            for _ in 0..=extra_closes {
                set.close().await.unwrap();
            }
            prop_assert_eq!(capability_closes.load(Ordering::SeqCst), 1);
            Ok(())
        })?;
    }
}
