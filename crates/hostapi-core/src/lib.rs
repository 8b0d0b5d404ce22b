//! Dispatch core mediating guest-to-host capability calls across a sandbox
//! boundary: a process-wide registry of capability factories, a per-guest
//! capability set that owns live capability instances and streaming
//! iterators, and the two pure dispatch entry points a sandbox binding
//! drives.
//!
//! This crate has no sandbox-runtime dependency of its own — `hostapi-wasm`
//! is what wires [`dispatch::run_host_api`]/[`dispatch::next`] to a concrete
//! `wasmtime` `Linker`.

pub mod capability;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod iterator;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod set;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use capability::{Capability, MethodDescriptor, StreamingExecutor, StreamingOutcome};
pub use config::{Config, ConfigBuilder, Limits};
pub use context::{CallContext, Cancellation, Deadline};
pub use dispatch::DispatchContext;
pub use error::{ErrorCode, HostApiError, Result};
pub use ids::{IteratorId, ServiceIdentity};
pub use iterator::{Chunk, Iterator};
pub use observability::{Field, LogLevel, Logger, MetricsSink, Span, Telemetry, Tracer};
pub use policy::{AllowAllPolicy, PolicyContext, PolicyDecision, PolicyEngine, PolicyRequest};
pub use registry::{CapabilityFactory, Registry};
pub use set::{CapabilitySet, NextOutcome};
