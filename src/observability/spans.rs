//! Span creation and mutation on top of the OpenTelemetry SDK tracer.
//!
//! # Responsibilities
//! - Link children to an explicitly passed parent context
//! - Reject mutation of ended spans
//! - Count started and ended spans
//!
//! # Design Decisions
//! - Parentage is an argument, never looked up from the ambient OTel context
//! - A `Span` ends itself on drop, so every exit path releases it
//! - Ended spans go to the tracer provider's batch processor; nothing else is
//!   shared between requests

use opentelemetry::trace::{
    Span as _, SpanKind, Status, TraceContextExt, TraceFlags, TraceState, Tracer as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Span as SdkSpan, Tracer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use opentelemetry::trace::{SpanId, TraceId};

use crate::observability::error::TelemetryError;

/// Identity of a span. Cheap to copy; holding one does not keep the span alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanContext {
    /// OTel context carrying this span as parent.
    fn as_parent(&self) -> Context {
        let parent = opentelemetry::trace::SpanContext::new(
            self.trace_id,
            self.span_id,
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(parent)
    }
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<AttributeValue> for opentelemetry::Value {
    fn from(v: AttributeValue) -> Self {
        match v {
            AttributeValue::String(s) => s.into(),
            AttributeValue::Int(i) => i.into(),
            AttributeValue::Double(d) => d.into(),
            AttributeValue::Bool(b) => b.into(),
        }
    }
}

impl From<AttributeValue> for opentelemetry::logs::AnyValue {
    fn from(v: AttributeValue) -> Self {
        match v {
            AttributeValue::String(s) => s.into(),
            AttributeValue::Int(i) => i.into(),
            AttributeValue::Double(d) => d.into(),
            AttributeValue::Bool(b) => b.into(),
        }
    }
}

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

/// Started/ended span counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanStats {
    pub started: u64,
    pub ended: u64,
}

struct TrackerInner {
    tracer: Tracer,
    started: AtomicU64,
    ended: AtomicU64,
}

/// Opens spans on one tracer and counts them.
#[derive(Clone)]
pub struct SpanTracker {
    inner: Arc<TrackerInner>,
}

impl fmt::Debug for SpanTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanTracker")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SpanTracker {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                tracer,
                started: AtomicU64::new(0),
                ended: AtomicU64::new(0),
            }),
        }
    }

    /// Open a span. With a parent the span joins the parent's trace,
    /// otherwise it roots a new one.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&SpanContext>) -> Span {
        self.start_span_with(name, parent, [])
    }

    pub fn start_span_with(
        &self,
        name: impl Into<String>,
        parent: Option<&SpanContext>,
        attributes: impl IntoIterator<Item = (&'static str, AttributeValue)>,
    ) -> Span {
        let name = name.into();
        let parent_cx = parent.map(SpanContext::as_parent).unwrap_or_default();
        let tracer = &self.inner.tracer;

        let inner = tracer
            .span_builder(name.clone())
            .with_kind(SpanKind::Internal)
            .with_attributes(attributes.into_iter().map(|(k, v)| KeyValue::new(k, v)))
            .start_with_context(tracer, &parent_cx);

        let otel = inner.span_context();
        let context = SpanContext {
            trace_id: otel.trace_id(),
            span_id: otel.span_id(),
        };
        self.inner.started.fetch_add(1, Ordering::Relaxed);

        Span {
            inner: Some(inner),
            name,
            context,
            tracker: self.clone(),
        }
    }

    pub fn stats(&self) -> SpanStats {
        SpanStats {
            started: self.inner.started.load(Ordering::Relaxed),
            ended: self.inner.ended.load(Ordering::Relaxed),
        }
    }
}

/// A live unit of work. Exclusively owned by the code path that opened it.
pub struct Span {
    inner: Option<SdkSpan>,
    name: String,
    context: SpanContext,
    tracker: SpanTracker,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl Span {
    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ended(&self) -> bool {
        self.inner.is_none()
    }

    fn live(&mut self) -> Result<&mut SdkSpan, TelemetryError> {
        match self.inner.as_mut() {
            Some(span) => Ok(span),
            None => Err(TelemetryError::SpanEnded(self.name.clone())),
        }
    }

    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<(), TelemetryError> {
        self.live()?
            .set_attribute(KeyValue::new(key.into(), value.into()));
        Ok(())
    }

    /// Store the error's type, message and source chain as attributes, and
    /// add the matching `exception` event.
    pub fn record_exception<E>(&mut self, error: &E) -> Result<(), TelemetryError>
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push_str("\ncaused by: ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }

        let fields = [
            KeyValue::new("exception.type", std::any::type_name::<E>()),
            KeyValue::new("exception.message", error.to_string()),
            KeyValue::new("exception.stacktrace", chain),
        ];
        let span = self.live()?;
        span.set_attributes(fields.clone());
        span.add_event("exception", fields.to_vec());
        Ok(())
    }

    /// Descriptions only carry meaning on errors and are dropped otherwise.
    pub fn set_status(
        &mut self,
        code: StatusCode,
        message: Option<String>,
    ) -> Result<(), TelemetryError> {
        let status = match code {
            StatusCode::Unset => Status::Unset,
            StatusCode::Ok => Status::Ok,
            StatusCode::Error => Status::error(message.unwrap_or_default()),
        };
        self.live()?.set_status(status);
        Ok(())
    }

    /// Finalize and hand to the span processor. A second call does nothing.
    pub fn end(&mut self) {
        if let Some(mut span) = self.inner.take() {
            span.end();
            self.tracker.inner.ended.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.end();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{attr, finished, tracker};
    use super::*;
    use opentelemetry::Value;

    #[test]
    fn test_ids_render_as_hex() {
        let (tracker, _exporter) = tracker();
        let span = tracker.start_span("health", None);
        let trace = span.context().trace_id.to_string();
        let id = span.context().span_id.to_string();
        assert_eq!(trace.len(), 32);
        assert_eq!(id.len(), 16);
        assert!(trace.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(span.context().trace_id, TraceId::INVALID);
    }

    #[test]
    fn test_child_inherits_trace_id() {
        let (tracker, exporter) = tracker();
        let root = tracker.start_span("get_users", None);
        let child = tracker.start_span("fetch_external_api", Some(&root.context()));

        assert_eq!(child.context().trace_id, root.context().trace_id);
        assert_ne!(child.context().span_id, root.context().span_id);

        drop(child);
        drop(root);

        let spans = finished(&exporter);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "fetch_external_api");
        assert_eq!(spans[0].parent_span_id, spans[1].span_context.span_id());
        assert_eq!(spans[1].parent_span_id, SpanId::INVALID);
    }

    #[test]
    fn test_mutation_after_end_is_rejected() {
        let (tracker, exporter) = tracker();
        let mut span = tracker.start_span("process_data", None);
        span.set_attribute("data.size", 3usize).unwrap();
        span.end();

        assert!(span.is_ended());
        assert!(matches!(
            span.set_attribute("late", true),
            Err(TelemetryError::SpanEnded(name)) if name == "process_data"
        ));
        assert!(span.set_status(StatusCode::Ok, None).is_err());

        let spans = finished(&exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(attr(&spans[0], "data.size"), Some(Value::I64(3)));
        assert_eq!(attr(&spans[0], "late"), None);
    }

    #[test]
    fn test_double_end_is_noop() {
        let (tracker, exporter) = tracker();
        let mut span = tracker.start_span("metrics_demo", None);
        span.end();
        span.end();
        drop(span);

        assert_eq!(finished(&exporter).len(), 1);
        assert_eq!(tracker.stats(), SpanStats { started: 1, ended: 1 });
    }

    #[test]
    fn test_drop_ends_span() {
        let (tracker, exporter) = tracker();
        {
            let _span = tracker.start_span("abandoned", None);
        }
        assert_eq!(tracker.stats().ended, 1);
        assert_eq!(finished(&exporter)[0].status, Status::Unset);
    }

    #[test]
    fn test_record_exception_walks_source_chain() {
        #[derive(Debug)]
        struct Inner;
        impl fmt::Display for Inner {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("connection refused")
            }
        }
        impl std::error::Error for Inner {}

        #[derive(Debug)]
        struct Outer(Inner);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("request failed")
            }
        }
        impl std::error::Error for Outer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let (tracker, exporter) = tracker();
        let mut span = tracker.start_span("send_logs_to_lambda", None);
        span.record_exception(&Outer(Inner)).unwrap();
        span.set_status(StatusCode::Error, Some("request failed".into())).unwrap();
        span.end();

        let data = &finished(&exporter)[0];
        assert_eq!(attr(data, "exception.message"), Some(Value::from("request failed")));
        assert_eq!(
            attr(data, "exception.stacktrace"),
            Some(Value::from("request failed\ncaused by: connection refused"))
        );
        assert_eq!(data.status, Status::error("request failed"));
        assert_eq!(data.events.events[0].name, "exception");
    }

    #[test]
    fn test_ok_status() {
        let (tracker, exporter) = tracker();
        let mut span = tracker.start_span("health", None);
        span.set_status(StatusCode::Ok, Some("ignored".into())).unwrap();
        span.end();
        assert_eq!(finished(&exporter)[0].status, Status::Ok);
    }
}
