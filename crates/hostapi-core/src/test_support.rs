//! Test doubles shared across this crate's unit and integration tests.
//!
//! Gated behind `test-util` as well as `cfg(test)` so downstream crates
//! (notably the wasm binding) can reuse these doubles in their own
//! integration tests without duplicating them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{Capability, MethodDescriptor, StreamingExecutor, StreamingOutcome};
use crate::config::{Config, Limits};
use crate::context::CallContext;
use crate::error::{HostApiError, Result};
use crate::ids::{IteratorId, ServiceIdentity};
use crate::iterator::{Chunk, Iterator};
use crate::policy::{PolicyContext, PolicyDecision, PolicyEngine, PolicyRequest};
use crate::registry::CapabilityFactory;

/// A minimal `CallContext` for tests that don't care about caller identity.
pub fn test_context() -> CallContext {
    test_context_for("test-caller", "1.0.0")
}

/// A `CallContext` for a specific caller, used to exercise ownership checks.
pub fn test_context_for(name: &str, version: &str) -> CallContext {
    CallContext::new(ServiceIdentity::new(name, version))
}

/// A default config using the allow-all policy and no-op telemetry.
pub fn test_config() -> Config {
    Config::builder("test-service", "1.0.0", Arc::new(crate::policy::AllowAllPolicy)).build()
}

/// A config with a specific policy engine installed.
pub fn test_config_with_policy(policy: Arc<dyn PolicyEngine>) -> Config {
    Config::builder("test-service", "1.0.0", policy).build()
}

/// A config with overridden iterator limits, for cap/sweep tests.
pub fn test_config_with_limits(max_iterators: usize, iterator_timeout: Duration) -> Config {
    Config::builder("test-service", "1.0.0", Arc::new(crate::policy::AllowAllPolicy))
        .limits(Limits::from_overrides(max_iterators, iterator_timeout, 0, 0))
        .build()
}

/// A policy engine that denies one named method and allows everything else.
pub struct LimitedPolicy {
    denied_method: String,
    reason: String,
}

impl LimitedPolicy {
    pub fn deny_method(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            denied_method: method.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PolicyEngine for LimitedPolicy {
    async fn evaluate(
        &self,
        _service: &ServiceIdentity,
        request: &PolicyRequest,
        _context: &PolicyContext,
    ) -> std::result::Result<PolicyDecision, String> {
        if request.method == self.denied_method {
            Ok(PolicyDecision::deny(self.reason.clone()))
        } else {
            Ok(PolicyDecision::allow())
        }
    }
}

/// A trivial capability that echoes its JSON params back for method `echo`,
/// and reports any other method as not found. Used wherever a test needs a
/// capability that just "works" without exercising streaming.
#[derive(Default)]
pub struct EchoCapability {
    name: String,
    close_calls: Option<Arc<AtomicUsize>>,
}

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, _ctx: &CallContext, method: &str, params: &[u8]) -> Result<Vec<u8>> {
        match method {
            "echo" => Ok(params.to_vec()),
            "restricted" => Ok(params.to_vec()),
            other => Err(crate::capability::method_not_found(&self.name, other)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(counter) = &self.close_calls {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct EchoFactory {
    name: String,
    methods: Vec<MethodDescriptor>,
    close_calls: Option<Arc<AtomicUsize>>,
}

impl EchoFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: vec![MethodDescriptor::new("echo"), MethodDescriptor::new("restricted")],
            close_calls: None,
        }
    }

    pub fn with_close_counter(name: impl Into<String>, close_calls: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.into(),
            methods: vec![MethodDescriptor::new("echo"), MethodDescriptor::new("restricted")],
            close_calls: Some(close_calls),
        }
    }
}

#[async_trait]
impl CapabilityFactory for EchoFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    async fn create(&self, _ctx: &CallContext, _config: &Config) -> Result<Box<dyn Capability>> {
        Ok(Box::new(EchoCapability {
            name: self.name.clone(),
            close_calls: self.close_calls.clone(),
        }))
    }
}

/// A streaming iterator that yields one JSON `{"item": n}` chunk per item in
/// a fixed list, then signals end-of-stream on the final one.
struct ListIterator {
    items: std::vec::IntoIter<i64>,
    close_calls: Option<Arc<AtomicUsize>>,
}

#[async_trait]
impl Iterator for ListIterator {
    async fn next(&mut self, _ctx: &CallContext) -> Result<Chunk> {
        match self.items.next() {
            Some(item) => {
                let data = serde_json::to_vec(&serde_json::json!({ "item": item })).unwrap();
                if self.items.len() == 0 {
                    Ok(Chunk::last(data))
                } else {
                    Ok(Chunk::more(data))
                }
            }
            None => Ok(Chunk::last(Vec::new())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(counter) = &self.close_calls {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A capability exposing one streaming method, `list`, that drains a fixed
/// list of integers via [`ListIterator`].
struct StreamingListCapability {
    name: String,
    items: Vec<i64>,
    close_calls: Option<Arc<AtomicUsize>>,
}

#[async_trait]
impl Capability for StreamingListCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, _ctx: &CallContext, method: &str, params: &[u8]) -> Result<Vec<u8>> {
        self.execute_streaming_inner(method, params).await.map(|outcome| outcome.response)
    }

    fn as_streaming(&self) -> Option<&dyn StreamingExecutor> {
        Some(self)
    }
}

impl StreamingListCapability {
    async fn execute_streaming_inner(&self, method: &str, _params: &[u8]) -> Result<StreamingOutcome> {
        if method != "list" {
            return Err(crate::capability::method_not_found(&self.name, method));
        }
        let iterator_id = IteratorId::generate();
        let response = serde_json::to_vec(&serde_json::json!({
            "iteratorId": iterator_id.as_str(),
            "hasData": !self.items.is_empty(),
        }))
        .unwrap();
        let iterator = Box::new(ListIterator {
            items: self.items.clone().into_iter(),
            close_calls: self.close_calls.clone(),
        });
        Ok(StreamingOutcome::streamed(response, iterator))
    }
}

#[async_trait]
impl StreamingExecutor for StreamingListCapability {
    async fn execute_streaming(&self, _ctx: &CallContext, method: &str, params: &[u8]) -> Result<StreamingOutcome> {
        self.execute_streaming_inner(method, params).await
    }
}

pub struct StreamingListFactory {
    name: String,
    items: Vec<i64>,
    methods: Vec<MethodDescriptor>,
    close_calls: Option<Arc<AtomicUsize>>,
}

impl StreamingListFactory {
    pub fn new(name: impl Into<String>, items: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            items,
            methods: vec![MethodDescriptor::new("list").streaming(true)],
            close_calls: None,
        }
    }

    pub fn with_close_counter(name: impl Into<String>, items: Vec<i64>, close_calls: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.into(),
            items,
            methods: vec![MethodDescriptor::new("list").streaming(true)],
            close_calls: Some(close_calls),
        }
    }
}

#[async_trait]
impl CapabilityFactory for StreamingListFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    async fn create(&self, _ctx: &CallContext, _config: &Config) -> Result<Box<dyn Capability>> {
        Ok(Box::new(StreamingListCapability {
            name: self.name.clone(),
            items: self.items.clone(),
            close_calls: self.close_calls.clone(),
        }))
    }
}

/// A capability whose every call fails, for exercising error paths that must
/// not leave an iterator registered.
pub struct FailingStreamingCapability {
    name: String,
}

#[async_trait]
impl Capability for FailingStreamingCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, _ctx: &CallContext, _method: &str, _params: &[u8]) -> Result<Vec<u8>> {
        Err(HostApiError::internal("boom"))
    }
}

pub struct FailingStreamingFactory {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl FailingStreamingFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: vec![MethodDescriptor::new("boom")],
        }
    }
}

#[async_trait]
impl CapabilityFactory for FailingStreamingFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    async fn create(&self, _ctx: &CallContext, _config: &Config) -> Result<Box<dyn Capability>> {
        Ok(Box::new(FailingStreamingCapability { name: self.name.clone() }))
    }
}

/// A capability whose `close` always fails, for exercising close-error
/// aggregation: a failing close must be reported but must not stop sibling
/// capabilities from also closing.
pub struct FailingCloseCapability {
    name: String,
}

#[async_trait]
impl Capability for FailingCloseCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, _ctx: &CallContext, method: &str, params: &[u8]) -> Result<Vec<u8>> {
        match method {
            "echo" => Ok(params.to_vec()),
            other => Err(crate::capability::method_not_found(&self.name, other)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        Err(HostApiError::internal("close failed"))
    }
}

pub struct FailingCloseFactory {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl FailingCloseFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: vec![MethodDescriptor::new("echo")],
        }
    }
}

#[async_trait]
impl CapabilityFactory for FailingCloseFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    async fn create(&self, _ctx: &CallContext, _config: &Config) -> Result<Box<dyn Capability>> {
        Ok(Box::new(FailingCloseCapability { name: self.name.clone() }))
    }
}
