//! The capability (a.k.a. Host API) contract (§4.2) and its streaming
//! variant.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{HostApiError, Result};
use crate::iterator::Iterator;

/// Describes one method a capability exposes, for tooling and validation.
/// Immutable once a factory publishes it (§3).
#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    name: String,
    param_schema: serde_json::Value,
    result_schema: serde_json::Value,
    error_codes: Vec<&'static str>,
    streaming: bool,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_schema: serde_json::Value::Null,
            result_schema: serde_json::Value::Null,
            error_codes: Vec::new(),
            streaming: false,
        }
    }

    pub fn with_param_schema(mut self, schema: serde_json::Value) -> Self {
        self.param_schema = schema;
        self
    }

    pub fn with_result_schema(mut self, schema: serde_json::Value) -> Self {
        self.result_schema = schema;
        self
    }

    pub fn with_error_codes(mut self, codes: Vec<&'static str>) -> Self {
        self.error_codes = codes;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_schema(&self) -> &serde_json::Value {
        &self.param_schema
    }

    pub fn result_schema(&self) -> &serde_json::Value {
        &self.result_schema
    }

    pub fn error_codes(&self) -> &[&'static str] {
        &self.error_codes
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

/// The outcome of a streaming `execute` call: the one-shot response bytes,
/// and — if the method actually produced a stream — the iterator to
/// register plus the `has_data` hint carried in the response.
pub struct StreamingOutcome {
    pub response: Vec<u8>,
    pub iterator: Option<Box<dyn Iterator>>,
}

impl StreamingOutcome {
    pub fn one_shot(response: Vec<u8>) -> Self {
        Self { response, iterator: None }
    }

    pub fn streamed(response: Vec<u8>, iterator: Box<dyn Iterator>) -> Self {
        Self {
            response,
            iterator: Some(iterator),
        }
    }
}

/// The streaming escape hatch (§9 "heterogeneous capability collection"):
/// kept as a separate object-safe trait rather than a supertrait of
/// [`Capability`], so the capability set can hold a single
/// `Box<dyn Capability>` per entry and ask it, per call, whether *this
/// particular* method execution should go through the streaming path —
/// without resorting to downcasting.
#[async_trait]
pub trait StreamingExecutor: Send + Sync {
    async fn execute_streaming(
        &self,
        ctx: &CallContext,
        method: &str,
        params: &[u8],
    ) -> Result<StreamingOutcome>;
}

/// A named, versioned capability instance exposing JSON-in/JSON-out methods.
///
/// `execute` never crashes the guest: unknown methods, bad parameters, and
/// any other semantic failure are reported as an [`HostApiError`] value.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    async fn execute(&self, ctx: &CallContext, method: &str, params: &[u8]) -> Result<Vec<u8>>;

    /// Capabilities that hold resources (connections, file handles) override
    /// this; the capability set invokes it exactly once during shutdown. A
    /// failing close is aggregated rather than allowed to stop sibling
    /// capabilities from also closing (§4.5, §7).
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// `Some(self)` for capabilities that implement [`StreamingExecutor`];
    /// `None` by default. If this returns `Some`, the capability set routes
    /// every method through `execute_streaming` instead of `execute`,
    /// exactly as the contract describes — a capability that doesn't
    /// override this has all of its methods treated as non-streaming.
    fn as_streaming(&self) -> Option<&dyn StreamingExecutor> {
        None
    }
}

/// Helper for capabilities implementing [`Capability::execute`]: returns the
/// standard "no such method" error for this capability's name.
pub fn method_not_found(capability_name: &str, method: &str) -> HostApiError {
    HostApiError::method_not_found(capability_name, method)
}
