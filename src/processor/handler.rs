//! The log-processing function.
//!
//! Each invocation opens its own root span. The caller's identity arrives
//! only as `metadata.traceId`/`metadata.spanId` and is recorded as plain
//! attributes; the caller's span is never resumed as a parent.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::observability::{
    Counter, CorrelationEnvelope, Histogram, Logger, Severity, Span, SpanTracker, TelemetryError,
    TelemetryProcess,
};
use crate::pipeline::{iso_timestamp, settle};

/// Simulated enrichment work per record.
const ENRICH_TIME: Duration = Duration::from_millis(50);

/// Runtime context handed to each invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub request_id: String,
    pub function_name: String,
    pub function_version: String,
    pub invoked_function_arn: String,
    #[serde(rename = "memoryLimitInMB")]
    pub memory_limit_in_mb: String,
    pub aws_request_id: String,
}

/// `{statusCode, body}` as returned by a function runtime. `body` is a
/// serialized JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub status_code: u16,
    pub body: String,
}

impl FunctionResponse {
    fn json(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The event could not be decoded into a log record.
    #[error("{0}")]
    Event(#[from] serde_json::Error),

    /// A failure after the record was decoded.
    #[error("{0}")]
    Processing(#[from] TelemetryError),
}

/// Log record as received, with the defaults applied.
#[derive(Debug)]
struct LogEvent {
    fields: Map<String, Value>,
    level: String,
    service: String,
}

impl LogEvent {
    fn new(data: Value) -> Self {
        let text = |key: &str, default: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        let level = text("level", "info");
        let service = text("service", "unknown");
        let fields = match data {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        Self {
            fields,
            level,
            service,
        }
    }

    fn message(&self) -> &str {
        self.fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Decode an invocation event: a JSON string, an envelope whose `body` is a
/// string or object, or the record itself.
pub fn decode_event(event: Value) -> Result<Value, serde_json::Error> {
    let body = match &event {
        Value::Object(fields) => fields.get("body").filter(|b| is_truthy(b)).cloned(),
        _ => None,
    };
    match (event, body) {
        (Value::String(raw), _) => serde_json::from_str(&raw),
        (_, Some(Value::String(raw))) => serde_json::from_str(&raw),
        (_, Some(body)) => Ok(body),
        (event, None) => Ok(event),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Handler state, built once per process.
#[derive(Debug, Clone)]
pub struct LogProcessor {
    tracker: SpanTracker,
    logger: Logger,
    processed: Counter,
    duration: Histogram,
    processor_name: String,
    aws_region: String,
}

impl LogProcessor {
    /// `telemetry` must already be initialized.
    pub fn new(telemetry: &TelemetryProcess, aws_region: &str) -> Result<Self, TelemetryError> {
        let name = telemetry.resource().service_name().to_string();
        let meter = telemetry.meter(&name)?;

        Ok(Self {
            tracker: telemetry.tracker()?,
            logger: telemetry.logger(&name)?,
            processed: meter.counter(
                "lambda_logs_processed_total",
                "Total number of logs processed by Lambda",
            ),
            duration: meter.histogram(
                "lambda_log_processing_duration_ms",
                "Duration of log processing in milliseconds",
            ),
            processor_name: name,
            aws_region: aws_region.to_string(),
        })
    }

    /// Process one invocation. Never fails: errors become a 500 response.
    pub async fn handle(&self, event: Value, context: &InvocationContext) -> FunctionResponse {
        let mut span = self.tracker.start_span("lambda_process_logs", None);
        let started = Instant::now();

        let result = self.process(&mut span, event, context, started).await;
        match settle(span, result) {
            Ok(body) => FunctionResponse::json(200, body),
            Err(e) => {
                let error = match &e {
                    ProcessorError::Event(_) => "Internal Lambda error",
                    ProcessorError::Processing(_) => "Failed to process log",
                };
                self.logger.emit(
                    self.logger
                        .record(Severity::Error, error)
                        .with_attribute("error", e.to_string())
                        .with_attribute("requestId", context.request_id.as_str()),
                );
                tracing::error!(
                    error = %e,
                    request_id = %context.request_id,
                    reason = error,
                    "Invocation failed"
                );

                FunctionResponse::json(
                    500,
                    json!({ "success": false, "error": error, "details": e.to_string() }),
                )
            }
        }
    }

    async fn process(
        &self,
        span: &mut Span,
        event: Value,
        context: &InvocationContext,
        started: Instant,
    ) -> Result<Value, ProcessorError> {
        let data = decode_event(event)?;
        let (upstream_trace, upstream_span) = CorrelationEnvelope::extract(&data);
        let log = LogEvent::new(data);

        span.set_attribute("log.level", log.level.as_str())?;
        span.set_attribute("log.service", log.service.as_str())?;
        span.set_attribute("lambda.request_id", context.request_id.as_str())?;
        CorrelationEnvelope::record_on(span, upstream_trace.as_deref(), upstream_span.as_deref())?;

        let ctx = span.context();
        self.logger.emit(
            self.logger
                .record(Severity::Info, "Processing log from application")
                .with_attribute("level", log.level.as_str())
                .with_attribute("service", log.service.as_str())
                .with_attribute("message", log.message())
                .with_attribute("requestId", context.request_id.as_str())
                .with_span(&ctx),
        );

        let processed_at = iso_timestamp();
        let mut enriched = log.fields.clone();
        enriched.insert("processedAt".into(), Value::from(processed_at.as_str()));
        enriched.insert("processor".into(), Value::from(self.processor_name.as_str()));
        enriched.insert("lambdaRequestId".into(), Value::from(context.request_id.as_str()));
        enriched.insert("awsRegion".into(), Value::from(self.aws_region.as_str()));

        let mut child = self.tracker.start_span("enrich_and_export_log", Some(&ctx));
        let enrich_result = self.enrich(&mut child).await;
        settle(child, enrich_result)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.processed.add(
            1.0,
            &[("level", log.level.as_str()), ("service", log.service.as_str())],
        )?;
        self.duration
            .record(elapsed_ms as f64, &[("level", log.level.as_str())])?;

        self.logger.emit(
            self.logger
                .record(Severity::Info, "Log processed and exported to Observe")
                .with_attribute("level", log.level.as_str())
                .with_attribute("service", log.service.as_str())
                .with_attribute("duration", elapsed_ms)
                .with_span(&ctx),
        );
        span.set_attribute("processing.duration_ms", elapsed_ms)?;

        let log_id = enriched
            .get("metadata")
            .and_then(|m| m.get("traceId"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let record = Value::Object(enriched);
        tracing::debug!(
            trace_id = %ctx.trace_id,
            log_id = %log_id,
            duration_ms = elapsed_ms,
            record = %record,
            "Log processed"
        );

        Ok(json!({
            "success": true,
            "message": "Log processed and exported to Observe",
            "logId": log_id,
            "processedAt": processed_at,
        }))
    }

    async fn enrich(&self, span: &mut Span) -> Result<(), ProcessorError> {
        tokio::time::sleep(ENRICH_TIME).await;
        span.set_attribute("log.enriched", true)?;
        Ok(())
    }
}
