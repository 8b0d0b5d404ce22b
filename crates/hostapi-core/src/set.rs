//! The capability set (§4.5): the central, per-guest-instance component that
//! owns capability instances and the live iterator table, routes `execute`,
//! and is the sole closer of its children.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use crate::capability::Capability;
use crate::config::Config;
use crate::context::CallContext;
use crate::error::{HostApiError, Result};
use crate::ids::{IteratorId, ServiceIdentity};
use crate::iterator::Iterator;
use crate::observability::LogLevel;
use crate::policy::{PolicyContext, PolicyRequest};

/// One entry in the capability map. Calls needing only shared access
/// (`execute`) take the read side of the lock, so independent calls to the
/// same capability are never serialized by the set itself — only the
/// capability's own internals can do that (§5). The write side is taken
/// exactly once, at `close`.
struct CapabilityEntry {
    instance: RwLock<Box<dyn Capability>>,
}

/// A live iterator plus the bookkeeping the set needs: which
/// capability/method produced it, when, and for whom — the last field is
/// what makes cross-service iterator hijack impossible (§4.5 step 3).
struct IteratorRecord {
    iterator: Mutex<Box<dyn Iterator>>,
    api: String,
    method: String,
    created_at: Instant,
    owner: ServiceIdentity,
}

/// The result of draining one iterator: the chunk's data and whether more
/// remain.
pub struct NextOutcome {
    pub data: Vec<u8>,
    pub has_more: bool,
}

pub struct CapabilitySet {
    capabilities: HashMap<String, CapabilityEntry>,
    iterators: RwLock<HashMap<IteratorId, Arc<IteratorRecord>>>,
    config: Config,
    closed: AtomicBool,
}

impl CapabilitySet {
    pub(crate) fn new(capabilities: Vec<(String, Box<dyn Capability>)>, config: Config) -> Self {
        let capabilities = capabilities
            .into_iter()
            .map(|(name, capability)| (name, CapabilityEntry { instance: RwLock::new(capability) }))
            .collect();
        Self {
            capabilities,
            iterators: RwLock::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Route a call to the named capability, enforcing policy and recording
    /// telemetry. See §4.5 for the full, ordered algorithm this implements.
    pub async fn execute(&self, ctx: &CallContext, api: &str, method: &str, params: &[u8]) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(HostApiError::set_closed());
        }

        let entry = self
            .capabilities
            .get(api)
            .ok_or_else(|| HostApiError::api_not_found(api))?;

        let telemetry = self.config.telemetry().clone();
        let mut span = telemetry.tracer().start_span(&format!("host.{api}.{method}"));

        let decision = self
            .config
            .policy_engine()
            .evaluate(
                ctx.caller(),
                &PolicyRequest {
                    api: api.to_string(),
                    method: method.to_string(),
                },
                &PolicyContext::new(),
            )
            .await;

        let decision = match decision {
            Ok(decision) => decision,
            Err(reason) => {
                let err = HostApiError::policy_error(&reason);
                span.record_error(err.code().as_str(), err.message());
                span.end();
                return Err(err);
            }
        };

        if !decision.allowed {
            let err = HostApiError::policy_denied(decision.reason);
            span.record_error(err.code().as_str(), err.message());
            span.end();
            return Err(err);
        }

        let start = Instant::now();
        let capability = entry.instance.read().await;
        let call_outcome = match capability.as_streaming() {
            Some(streaming) => streaming.execute_streaming(ctx, method, params).await,
            None => capability.execute(ctx, method, params).await.map(crate::capability::StreamingOutcome::one_shot),
        };
        drop(capability);

        // The final result isn't known until iterator registration (if any)
        // settles, so telemetry is recorded once, below, against this value
        // rather than against the raw capability result.
        let result: Result<Vec<u8>> = match call_outcome {
            Ok(outcome) => self.register_streaming_iterator(ctx, api, method, outcome).await,
            Err(err) => Err(err),
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let success = result.is_ok();
        telemetry
            .metrics()
            .incr_counter("host_api_calls", &[("api", api), ("method", method), ("success", if success { "true" } else { "false" })]);
        telemetry
            .metrics()
            .record_duration_ms("host_api_duration_ms", &[("api", api), ("method", method)], duration_ms);

        match result {
            Ok(response) => {
                span.end();
                Ok(response)
            }
            Err(err) => {
                span.record_error(err.code().as_str(), err.message());
                span.end();
                telemetry.logger().log(
                    LogLevel::Error,
                    "host api call failed",
                    &[("api", api.to_string()), ("method", method.to_string()), ("duration_ms", duration_ms.to_string())],
                );
                Err(err)
            }
        }
    }

    /// If the capability produced an iterator, register it (enforcing the
    /// per-service cap) and return the initial response; otherwise pass the
    /// one-shot response through unchanged. Any failure here — a malformed
    /// streaming response or an exhausted cap — closes the just-produced
    /// iterator before returning, so a rejected registration never leaks it.
    async fn register_streaming_iterator(
        &self,
        ctx: &CallContext,
        api: &str,
        method: &str,
        outcome: crate::capability::StreamingOutcome,
    ) -> Result<Vec<u8>> {
        let Some(iterator) = outcome.iterator else {
            return Ok(outcome.response);
        };

        let iterator_id = match extract_iterator_id(&outcome.response) {
            Ok(id) => id,
            Err(err) => {
                let mut iterator = iterator;
                if let Err(close_err) = iterator.close().await {
                    tracing::warn!(api, method, error = %close_err, "failed to close iterator rejected for a malformed streaming response");
                }
                return Err(err);
            }
        };

        let limit = self.config.limits().max_iterators_per_service;
        let mut iterators = self.iterators.write().await;
        if iterators.len() >= limit {
            drop(iterators);
            let mut iterator = iterator;
            if let Err(close_err) = iterator.close().await {
                tracing::warn!(api, method, error = %close_err, "failed to close iterator rejected by the per-service cap");
            }
            return Err(HostApiError::iterator_limit_exceeded(limit));
        }
        iterators.insert(
            iterator_id,
            Arc::new(IteratorRecord {
                iterator: Mutex::new(iterator),
                api: api.to_string(),
                method: method.to_string(),
                created_at: Instant::now(),
                owner: ctx.caller().clone(),
            }),
        );
        Ok(outcome.response)
    }

    /// Pull one chunk from a live iterator. See §4.5 for the full, ordered
    /// algorithm this implements.
    pub async fn next_iterator(&self, ctx: &CallContext, id: &IteratorId) -> Result<NextOutcome> {
        if self.is_closed() {
            return Err(HostApiError::set_closed());
        }

        let record = {
            let iterators = self.iterators.read().await;
            iterators.get(id).cloned()
        };

        let record = match record {
            Some(record) if &record.owner == ctx.caller() => record,
            // Mismatched owner is reported identically to "not found" (§4.5
            // step 3): a guest must not be able to distinguish "this
            // iterator belongs to someone else" from "this iterator does
            // not exist".
            _ => return Err(HostApiError::iterator_not_found()),
        };

        let telemetry = self.config.telemetry().clone();
        let mut span = telemetry
            .tracer()
            .start_span(&format!("host.{}.{}.next", record.api, record.method));

        let start = Instant::now();
        let mut guard = record.iterator.lock().await;
        let result = guard.next(ctx).await;
        drop(guard);
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let labels_base = [("api", record.api.as_str()), ("method", record.method.as_str())];
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                span.record_error(err.code().as_str(), err.message());
                span.end();
                telemetry
                    .metrics()
                    .incr_counter("host_api_iterator_calls", &labels_base);
                return Err(err);
            }
        };

        let has_more_label = if chunk.has_more { "true" } else { "false" };
        telemetry.metrics().incr_counter(
            "host_api_iterator_calls",
            &[("api", &record.api), ("method", &record.method), ("has_more", has_more_label)],
        );
        telemetry
            .metrics()
            .record_duration_ms("host_api_iterator_duration_ms", &labels_base, duration_ms);
        span.end();

        if !chunk.has_more {
            if let Err(err) = self.remove_and_close(id).await {
                telemetry.logger().log(
                    LogLevel::Error,
                    "iterator close failed after final chunk",
                    &[("api", record.api.clone()), ("method", record.method.clone()), ("message", err.message().to_string())],
                );
            }
        }

        Ok(NextOutcome {
            data: chunk.data,
            has_more: chunk.has_more,
        })
    }

    /// Explicit guest-initiated close. Idempotent: closing an id that is not
    /// (or no longer) live is a no-op success. The iterator's own close
    /// failure, if any, is surfaced to the caller (§7) rather than swallowed.
    pub async fn close_iterator(&self, _ctx: &CallContext, id: &IteratorId) -> Result<()> {
        self.remove_and_close(id).await
    }

    async fn remove_and_close(&self, id: &IteratorId) -> Result<()> {
        let record = self.iterators.write().await.remove(id);
        match record {
            Some(record) => record.iterator.lock().await.close().await,
            None => Ok(()),
        }
    }

    /// Reclaim every iterator whose age exceeds the configured timeout.
    /// Returns the count reclaimed. The removal happens under the write
    /// lock; the (potentially slow) close calls happen after it is
    /// released, so a sweep never blocks a concurrent `next_iterator` on an
    /// unrelated iterator's close (§4.5, §5). A failing close is logged and
    /// does not stop the sweep from reclaiming the remaining stale entries.
    pub async fn cleanup_stale_iterators(&self) -> usize {
        let timeout = self.config.limits().iterator_timeout;
        let now = Instant::now();

        let stale: Vec<(IteratorId, Arc<IteratorRecord>)> = {
            let mut iterators = self.iterators.write().await;
            let stale_ids: Vec<IteratorId> = iterators
                .iter()
                .filter(|(_, record)| now.duration_since(record.created_at) > timeout)
                .map(|(id, _)| id.clone())
                .collect();
            stale_ids
                .into_iter()
                .filter_map(|id| iterators.remove(&id).map(|record| (id, record)))
                .collect()
        };

        let count = stale.len();
        for (id, record) in stale {
            if let Err(err) = record.iterator.lock().await.close().await {
                tracing::warn!(iterator = %id.as_str(), error = %err, "failed to close stale iterator");
            }
        }
        count
    }

    /// Idempotent shutdown (§4.5): the first call closes every owned
    /// iterator and every resource-holding capability; every subsequent call
    /// is a no-op success. One failing child does not stop its siblings from
    /// closing (§7); every failure is collected and returned as a single
    /// aggregate error.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut errors = crate::error::CloseErrors::new();

        let drained: Vec<(IteratorId, Arc<IteratorRecord>)> = {
            let mut iterators = self.iterators.write().await;
            std::mem::take(&mut *iterators).into_iter().collect()
        };
        for (id, record) in drained {
            if let Err(err) = record.iterator.lock().await.close().await {
                errors.push(format!("iterator:{}", id.as_str()), err);
            }
        }

        for (name, entry) in &self.capabilities {
            if let Err(err) = entry.instance.write().await.close().await {
                errors.push(format!("capability:{name}"), err);
            }
        }

        errors.into_result()
    }
}

/// Pull `iteratorId` back out of a streaming initial response so it can be
/// used as the registry key. The response bytes are the same JSON record
/// that will be forwarded to the guest (§6's streaming initial response
/// shape: `{iteratorId, hasData}`).
fn extract_iterator_id(response: &[u8]) -> Result<IteratorId> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Initial {
        iterator_id: String,
    }
    let initial: Initial = serde_json::from_slice(response)
        .map_err(|err| HostApiError::internal(format!("malformed streaming response: {err}")))?;
    IteratorId::parse(initial.iterator_id)
        .ok_or_else(|| HostApiError::internal("capability returned an empty iterator id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{
        test_config_with_limits, test_context, test_context_for, EchoFactory, LimitedPolicy, StreamingListFactory,
    };
    use crate::registry::Registry;
    use std::time::Duration;

    async fn echo_set() -> CapabilitySet {
        let registry = Registry::new();
        registry.register(Arc::new(EchoFactory::new("test.api"))).await.unwrap();
        let ctx = test_context();
        registry
            .create_set(&ctx, &["test.api"], crate::test_support::test_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn echo_success() {
        let set = echo_set().await;
        let ctx = test_context();
        let response = set
            .execute(&ctx, "test.api", "echo", br#"{"message":"hello"}"#)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(value, serde_json::json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn unknown_capability_returns_api_not_found() {
        let registry = Registry::new();
        let ctx = test_context();
        let set = registry.create_set(&ctx, &[] as &[&str], crate::test_support::test_config()).await.unwrap();
        let err = set.execute(&ctx, "ghost", "m", b"{}").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiNotFound);
    }

    #[tokio::test]
    async fn policy_deny_surfaces_reason() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoFactory::new("test.api"))).await.unwrap();
        let ctx = test_context();
        let config = crate::test_support::test_config_with_policy(Arc::new(LimitedPolicy::deny_method("restricted", "no")));
        let set = registry.create_set(&ctx, &["test.api"], config).await.unwrap();
        let err = set.execute(&ctx, "test.api", "restricted", b"{}").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PolicyDenied);
        assert_eq!(err.message(), "no");
    }

    #[tokio::test]
    async fn streaming_happy_path_drains_then_not_found() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StreamingListFactory::new("test.streaming.list", vec![1, 2, 3])))
            .await
            .unwrap();
        let ctx = test_context();
        let set = registry
            .create_set(&ctx, &["test.streaming.list"], crate::test_support::test_config())
            .await
            .unwrap();

        let response = set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();
        let initial: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(initial["hasData"], true);
        let id = IteratorId::parse(initial["iteratorId"].as_str().unwrap().to_string()).unwrap();

        for expected in [1, 2] {
            let outcome = set.next_iterator(&ctx, &id).await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&outcome.data).unwrap();
            assert_eq!(value["item"], expected);
            assert!(outcome.has_more);
        }
        let outcome = set.next_iterator(&ctx, &id).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&outcome.data).unwrap();
        assert_eq!(value["item"], 3);
        assert!(!outcome.has_more);

        let err = set.next_iterator(&ctx, &id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IteratorNotFound);
    }

    #[tokio::test]
    async fn iterator_cap_closes_overflow_without_leak() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StreamingListFactory::new("test.streaming.list", vec![1])))
            .await
            .unwrap();
        let ctx = test_context();
        let config = test_config_with_limits(2, Duration::from_secs(60));
        let set = registry
            .create_set(&ctx, &["test.streaming.list"], config)
            .await
            .unwrap();

        set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();
        set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();
        let err = set
            .execute(&ctx, "test.streaming.list", "list", b"{}")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IteratorLimitExceeded);
        assert_eq!(set.iterators.read().await.len(), 2);
    }

    #[tokio::test]
    async fn stale_sweep_reclaims_and_then_not_found() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StreamingListFactory::new("test.streaming.list", vec![1, 2])))
            .await
            .unwrap();
        let ctx = test_context();
        let config = test_config_with_limits(10, Duration::from_millis(50));
        let set = registry
            .create_set(&ctx, &["test.streaming.list"], config)
            .await
            .unwrap();

        let response = set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();
        let initial: serde_json::Value = serde_json::from_slice(&response).unwrap();
        let id = IteratorId::parse(initial["iteratorId"].as_str().unwrap().to_string()).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let reclaimed = set.cleanup_stale_iterators().await;
        assert_eq!(reclaimed, 1);

        let err = set.next_iterator(&ctx, &id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IteratorNotFound);
    }

    #[tokio::test]
    async fn cross_service_next_iterator_is_reported_as_not_found() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StreamingListFactory::new("test.streaming.list", vec![1])))
            .await
            .unwrap();
        let owner_ctx = test_context_for("owner", "1.0.0");
        let set = registry
            .create_set(&owner_ctx, &["test.streaming.list"], crate::test_support::test_config())
            .await
            .unwrap();

        let response = set
            .execute(&owner_ctx, "test.streaming.list", "list", b"{}")
            .await
            .unwrap();
        let initial: serde_json::Value = serde_json::from_slice(&response).unwrap();
        let id = IteratorId::parse(initial["iteratorId"].as_str().unwrap().to_string()).unwrap();

        let intruder_ctx = test_context_for("intruder", "1.0.0");
        let err = set.next_iterator(&intruder_ctx, &id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IteratorNotFound);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_children_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let capability_closes = Arc::new(AtomicUsize::new(0));
        let iterator_closes = Arc::new(AtomicUsize::new(0));

        let registry = Registry::new();
        registry
            .register(Arc::new(EchoFactory::with_close_counter("test.api", capability_closes.clone())))
            .await
            .unwrap();
        registry
            .register(Arc::new(StreamingListFactory::with_close_counter(
                "test.streaming.list",
                vec![1, 2],
                iterator_closes.clone(),
            )))
            .await
            .unwrap();

        let ctx = test_context();
        let set = registry
            .create_set(&ctx, &["test.api", "test.streaming.list"], crate::test_support::test_config())
            .await
            .unwrap();
        set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();

        set.close().await.unwrap();
        set.close().await.unwrap();

        assert_eq!(capability_closes.load(Ordering::SeqCst), 1);
        assert_eq!(iterator_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_aggregates_failures_without_stopping_siblings() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let capability_closes = Arc::new(AtomicUsize::new(0));
        let iterator_closes = Arc::new(AtomicUsize::new(0));

        let registry = Registry::new();
        registry
            .register(Arc::new(EchoFactory::with_close_counter("test.api", capability_closes.clone())))
            .await
            .unwrap();
        registry
            .register(Arc::new(StreamingListFactory::with_close_counter(
                "test.streaming.list",
                vec![1, 2],
                iterator_closes.clone(),
            )))
            .await
            .unwrap();
        registry
            .register(Arc::new(crate::test_support::FailingCloseFactory::new("test.failing-close")))
            .await
            .unwrap();

        let ctx = test_context();
        let set = registry
            .create_set(
                &ctx,
                &["test.api", "test.streaming.list", "test.failing-close"],
                crate::test_support::test_config(),
            )
            .await
            .unwrap();
        set.execute(&ctx, "test.streaming.list", "list", b"{}").await.unwrap();

        let err = set.close().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(err.message().contains("test.failing-close"));

        // Siblings still closed despite the failing capability.
        assert_eq!(capability_closes.load(Ordering::SeqCst), 1);
        assert_eq!(iterator_closes.load(Ordering::SeqCst), 1);

        // Idempotent: a second close is a no-op success, not a repeat failure.
        set.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_after_close_report_set_closed() {
        let set = echo_set().await;
        let ctx = test_context();
        set.close().await.unwrap();

        let err = set.execute(&ctx, "test.api", "echo", b"{}").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::HostApiSetClosed);

        let err = set
            .next_iterator(&ctx, &IteratorId::generate())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HostApiSetClosed);
    }

    #[tokio::test]
    async fn execute_error_does_not_register_an_iterator() {
        let registry = Registry::new();
        registry
            .register(Arc::new(crate::test_support::FailingStreamingFactory::new("test.failing")))
            .await
            .unwrap();
        let ctx = test_context();
        let set = registry
            .create_set(&ctx, &["test.failing"], crate::test_support::test_config())
            .await
            .unwrap();
        let err = set.execute(&ctx, "test.failing", "boom", b"{}").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(set.iterators.read().await.len(), 0);
    }
}
