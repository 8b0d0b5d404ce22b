//! The telemetry facade the core calls into.
//!
//! These traits are intentionally narrow collaborator interfaces, not a
//! binding to any particular vendor: the core requires only the ability to
//! start/end spans, record integer counters, and record duration histograms
//! (§6). Wiring a concrete backend (OpenTelemetry, Prometheus, whatever the
//! embedder already runs) onto these traits happens outside this crate.
//!
//! The core's own operational logs (registry mutations, sweep runs) go
//! through the `tracing` crate directly at their call sites — that is a
//! separate, complementary concern from the per-call guest-facing telemetry
//! modeled here (§4.9).

use std::sync::Arc;

/// Log severity, matching the levels a structured logger is expected to
/// support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured log field.
pub type Field = (&'static str, String);

/// A minimal levelled, structured logger.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: LogLevel, message: &str, fields: &[Field]);
}

/// An open telemetry span. `end` is taken by value so a span cannot be ended
/// twice by construction.
pub trait Span: Send + Sync {
    fn record_error(&mut self, code: &str, message: &str);
    fn end(self: Box<Self>);
}

/// Starts spans for per-call tracing. Named `host.<api>.<method>` and
/// `host.<api>.<method>.next` per §4.5.
pub trait Tracer: Send + Sync + 'static {
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

/// Counters and histograms, keyed by the dimensions named in §4.5 (`api`,
/// `method`, `success`/`has_more`).
pub trait MetricsSink: Send + Sync + 'static {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn record_duration_ms(&self, name: &str, labels: &[(&str, &str)], duration_ms: f64);
}

/// The bundle of telemetry collaborators a [`crate::config::Config`] snapshot
/// carries. Grouping these three behind one struct (rather than three loose
/// `Arc`s threaded everywhere) mirrors the observability facade pattern the
/// host framework this core is extracted from uses for the same reason:
/// a single injection point instead of three.
#[derive(Clone)]
pub struct Telemetry {
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn MetricsSink>,
    logger: Arc<dyn Logger>,
}

impl Telemetry {
    pub fn new(tracer: Arc<dyn Tracer>, metrics: Arc<dyn MetricsSink>, logger: Arc<dyn Logger>) -> Self {
        Self {
            tracer,
            metrics,
            logger,
        }
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// A telemetry bundle that records nothing. Useful for embedders that
    /// have not wired a backend yet, and for tests that only care about
    /// dispatch semantics.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopTracer), Arc::new(NoopMetrics), Arc::new(NoopLogger))
    }
}

struct NoopSpan;
impl Span for NoopSpan {
    fn record_error(&mut self, _code: &str, _message: &str) {}
    fn end(self: Box<Self>) {}
}

struct NoopTracer;
impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

struct NoopMetrics;
impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn record_duration_ms(&self, _name: &str, _labels: &[(&str, &str)], _duration_ms: f64) {}
}

struct NoopLogger;
impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[Field]) {}
}
