//! OTLP/HTTP exporters and the log export loop.
//!
//! # Responsibilities
//! - Build the `opentelemetry-otlp` span, metric and log exporters for
//!   `{endpoint}/v1/{traces|metrics|logs}`
//! - Attach the bearer credential when one is configured
//! - Feed queued log records through the SDK logger provider
//!
//! # Design Decisions
//! - One `reqwest::Client` shared by the three exporters, with the export
//!   timeout applied to every request
//! - JSON encoding over HTTP, so a plain HTTP collector can read the batches
//! - Export failures are absorbed by the SDK processors; they never reach
//!   callers

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::trace::{SpanId, TraceId};
use opentelemetry_otlp::{
    LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig, WithHttpConfig,
};
use opentelemetry_sdk::logs::{Logger, LoggerProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

use crate::observability::error::TelemetryError;
use crate::observability::logs::{LogRecord, LogSink};

/// Telemetry signal type, mapped to its OTLP/HTTP path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

/// Shared client, endpoint and credential for the three exporters.
#[derive(Debug, Clone)]
pub struct ExporterSet {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl ExporterSet {
    /// An empty or absent token means no `Authorization` header.
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("observe-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::ExporterInit(e.to_string()))?;

        let mut headers = HashMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headers,
            timeout,
        })
    }

    pub fn signal_url(&self, signal: Signal) -> String {
        format!("{}/v1/{}", self.endpoint, signal.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("Authorization").map(String::as_str)
    }

    pub fn span_exporter(&self) -> Result<SpanExporter, TelemetryError> {
        SpanExporter::builder()
            .with_http()
            .with_http_client(self.client.clone())
            .with_protocol(Protocol::HttpJson)
            .with_endpoint(self.signal_url(Signal::Traces))
            .with_timeout(self.timeout)
            .with_headers(self.headers.clone())
            .build()
            .map_err(|e| TelemetryError::ExporterInit(format!("traces: {e}")))
    }

    pub fn metric_exporter(&self) -> Result<MetricExporter, TelemetryError> {
        MetricExporter::builder()
            .with_http()
            .with_http_client(self.client.clone())
            .with_protocol(Protocol::HttpJson)
            .with_endpoint(self.signal_url(Signal::Metrics))
            .with_timeout(self.timeout)
            .with_headers(self.headers.clone())
            .build()
            .map_err(|e| TelemetryError::ExporterInit(format!("metrics: {e}")))
    }

    pub fn log_exporter(&self) -> Result<LogExporter, TelemetryError> {
        LogExporter::builder()
            .with_http()
            .with_http_client(self.client.clone())
            .with_protocol(Protocol::HttpJson)
            .with_endpoint(self.signal_url(Signal::Logs))
            .with_timeout(self.timeout)
            .with_headers(self.headers.clone())
            .build()
            .map_err(|e| TelemetryError::ExporterInit(format!("logs: {e}")))
    }
}

/// Export queued records one at a time, in order, until every sender is gone
/// and the queue is drained; then shut the logger provider down.
///
/// Blocking: the SDK's simple processor waits on each export, so this runs
/// on the blocking pool. Once `abandoned` is set the remaining records are
/// counted as dropped instead of exported.
pub(crate) fn run_log_exporter(
    mut records: mpsc::Receiver<LogRecord>,
    provider: LoggerProvider,
    sink: LogSink,
    abandoned: Arc<AtomicBool>,
) {
    let mut loggers: HashMap<String, Logger> = HashMap::new();

    while let Some(record) = records.blocking_recv() {
        if abandoned.load(Ordering::Relaxed) {
            sink.count_dropped(1);
            continue;
        }
        let logger = loggers
            .entry(record.scope.clone())
            .or_insert_with(|| provider.logger(record.scope.clone()));
        emit(logger, record);
    }

    if let Err(e) = provider.shutdown() {
        tracing::debug!(error = %e, "Logger provider shutdown reported an error");
    }
    tracing::debug!("Log exporter stopped");
}

fn emit(logger: &Logger, record: LogRecord) {
    let mut otel = logger.create_log_record();
    otel.set_timestamp(record.time);
    otel.set_observed_timestamp(SystemTime::now());
    otel.set_severity_number(record.severity.into());
    otel.set_severity_text(record.severity.text());
    otel.set_body(AnyValue::from(record.body));
    for (key, value) in record.attributes {
        otel.add_attribute(key, AnyValue::from(value));
    }

    let trace_id = record.trace_id.as_deref().and_then(|t| TraceId::from_hex(t).ok());
    let span_id = record.span_id.as_deref().and_then(|s| SpanId::from_hex(s).ok());
    if let (Some(trace_id), Some(span_id)) = (trace_id, span_id) {
        otel.set_trace_context(trace_id, span_id, None);
    }

    logger.emit(otel);
}
