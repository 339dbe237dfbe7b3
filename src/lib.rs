//! Telemetry export core for agent runtimes.
//!
//! The crate provides the plumbing between a workflow's event stream and any
//! number of observability backends:
//! - An in-process `EventStream` of `IntermediateStep`s.
//! - An `Exporter` lifecycle (subscription ownership, export-task tracking,
//!   graceful shutdown) around pluggable `ExportSink`s.
//! - An `ExporterRegistry` of factories and a per-run `ExporterManager`.
//! - A `Span` model with header-driven redaction and an OTLP-shaped
//!   converter.
//! - A `FunctionInterceptChain` for wrapping function invocations, with a
//!   caching final intercept.

mod cache_intercept;
mod config;
mod context;
mod error;
mod event;
mod exporter;
mod intercept;
mod logging;
mod manager;
mod otel;
mod redaction;
mod registry;
mod sinks;
mod span;

pub use cache_intercept::{CacheIntercept, CacheMode};
pub use config::{RedactionConfig, TelemetryConfig};
pub use context::{InvocationContext, RequestMetadata};
pub use error::{Result, TracewayError};
pub use event::{EventStream, IntermediateStep, StepKind, Subscription};
pub use exporter::{ExportSink, Exporter, DEFAULT_SWEEP_TIMEOUT};
pub use intercept::{
    validate_intercepts, FunctionIntercept, FunctionInterceptChain, FunctionInterceptContext,
    InvokeFn, StreamFn, ValueStream,
};
pub use logging::init_logging;
pub use manager::{ExporterManager, DEFAULT_SHUTDOWN_TIMEOUT};
pub use otel::{
    convert_span_to_otel, convert_spans_to_otel_batch, OtelEvent, OtelSpan, OtelSpanKind,
    OtelStatusCode,
};
pub use redaction::{
    HeaderRedactionProcessor, RedactionCallback, SpanRedactionProcessor,
    DEFAULT_REDACTION_SENTINEL,
};
pub use registry::{ExporterFactory, ExporterRegistry, DEFAULT_EXPORTER_NAME};
pub use sinks::{JsonlFileSink, SpanPublishSink};
pub use span::{Span, SpanContext, SpanEvent, SpanStatus, StatusCode, EVENT_TYPE_KEY};
