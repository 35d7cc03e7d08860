//! Cross-process correlation through the request payload.
//!
//! The caller copies its span identity into the outbound body's `metadata`
//! object; the receiver records the ids as plain attributes on its own,
//! independently rooted span. No parentage is resumed across the boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::observability::error::TelemetryError;
use crate::observability::spans::Span;

pub const UPSTREAM_TRACE_ID: &str = "upstream.trace_id";
pub const UPSTREAM_SPAN_ID: &str = "upstream.span_id";

/// Caller span identity as carried in `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEnvelope {
    pub trace_id: String,
    pub span_id: String,
}

impl CorrelationEnvelope {
    pub fn from_span(span: &Span) -> Self {
        let context = span.context();
        Self {
            trace_id: context.trace_id.to_string(),
            span_id: context.span_id.to_string(),
        }
    }

    /// Merge into `payload.metadata`, creating it when absent. A non-object
    /// `metadata` is kept under `metadata.value`.
    pub fn inject_into(&self, payload: &mut Value) {
        let Value::Object(fields) = payload else {
            return;
        };

        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            let previous = metadata.take();
            let mut wrapped = Map::new();
            if !previous.is_null() {
                wrapped.insert("value".into(), previous);
            }
            *metadata = Value::Object(wrapped);
        }

        if let Value::Object(metadata) = metadata {
            metadata.insert("traceId".into(), Value::String(self.trace_id.clone()));
            metadata.insert("spanId".into(), Value::String(self.span_id.clone()));
        }
    }

    /// Read the ids back out of a received payload. Either id may be missing.
    pub fn extract(payload: &Value) -> (Option<String>, Option<String>) {
        let metadata = payload.get("metadata");
        let field = |name: &str| {
            metadata
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        (field("traceId"), field("spanId"))
    }

    /// Record received ids on the receiver's root span, `"unknown"` when absent.
    pub fn record_on(
        span: &mut Span,
        trace_id: Option<&str>,
        span_id: Option<&str>,
    ) -> Result<(), TelemetryError> {
        span.set_attribute(UPSTREAM_TRACE_ID, trace_id.unwrap_or("unknown"))?;
        span.set_attribute(UPSTREAM_SPAN_ID, span_id.unwrap_or("unknown"))?;
        Ok(())
    }
}
