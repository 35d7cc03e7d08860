//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request pipelines produce:
//!     → spans.rs    (spans with explicit parent linkage)
//!     → metrics.rs  (counters, histograms, sampled gauges)
//!     → logging.rs  (tracing events, bridged to log records)
//!
//! process.rs owns the OpenTelemetry SDK providers:
//!     tracer provider → batch span processor → OTLP span exporter   → POST /v1/traces
//!     meter provider  → periodic reader      → OTLP metric exporter → POST /v1/metrics
//!     log sink (bounded queue) → logger provider → OTLP log exporter → POST /v1/logs
//! ```
//!
//! # Design Decisions
//! - One `TelemetryProcess` per process, passed explicitly by `Arc`
//! - Trace identity crosses process boundaries only as payload metadata
//!   (correlation.rs), never as a resumed parent
//! - Export failures are absorbed inside the SDK processors

pub mod correlation;
pub mod error;
pub mod exporter;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod process;
pub mod resource;
pub mod spans;

pub use correlation::CorrelationEnvelope;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, OtlpLogLayer};
pub use logs::{LogRecord, LogSink, Logger, Severity};
pub use metrics::{Counter, Histogram, Meter, MetricsRegistry, ObservableGauge, Observation};
pub use process::{ProcessState, TelemetryProcess, TelemetrySettings};
pub use resource::{Environment, ResourceDescriptor};
pub use spans::{AttributeValue, Span, SpanContext, SpanTracker, StatusCode};
