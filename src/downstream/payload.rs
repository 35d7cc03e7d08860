//! Log payload exchanged between the front service and the log processor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::observability::{AttributeValue, CorrelationEnvelope};

fn default_level() -> Value {
    Value::String("info".to_string())
}

fn default_metadata() -> Value {
    Value::Object(Map::new())
}

/// Inbound `POST /api/logs-to-lambda` body.
///
/// `message` and `level` are forwarded as given, whatever their JSON type.
/// Only an absent `level` becomes `"info"`; an explicit `null` is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRequest {
    #[serde(default)]
    pub message: Value,

    #[serde(default = "default_level")]
    pub level: Value,

    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

impl LogRequest {
    /// `log.level` span attribute. Strings, numbers and booleans are kept as
    /// typed values; `null`, arrays and objects set no attribute.
    pub fn level_attribute(&self) -> Option<AttributeValue> {
        match &self.level {
            Value::String(s) => Some(AttributeValue::from(s.as_str())),
            Value::Bool(b) => Some(AttributeValue::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(AttributeValue::from(i)),
                None => n.as_f64().map(AttributeValue::from),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Body posted to the log processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub timestamp: String,
    pub level: Value,
    pub message: Value,
    pub service: String,
    pub metadata: Value,
}

impl LogPayload {
    pub fn new(request: LogRequest, service: impl Into<String>, timestamp: String) -> Self {
        Self {
            timestamp,
            level: request.level,
            message: request.message,
            service: service.into(),
            metadata: request.metadata,
        }
    }

    /// Serialize with the caller's span identity merged into `metadata`.
    pub fn to_json(&self, envelope: &CorrelationEnvelope) -> Value {
        let mut body = serde_json::json!({
            "timestamp": self.timestamp,
            "level": self.level,
            "message": self.message,
            "service": self.service,
            "metadata": self.metadata,
        });
        envelope.inject_into(&mut body);
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: LogRequest = serde_json::from_value(json!({ "message": "hi" })).unwrap();
        assert_eq!(request.level, "info");
        assert_eq!(request.metadata, json!({}));
        assert_eq!(request.level_attribute(), Some(AttributeValue::from("info")));

        let empty: LogRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.message, Value::Null);
    }

    #[test]
    fn test_request_accepts_any_json_types() {
        let numeric: LogRequest = serde_json::from_value(json!({ "message": 42 })).unwrap();
        assert_eq!(numeric.message, json!(42));
        assert_eq!(numeric.level, "info");

        let object: LogRequest =
            serde_json::from_value(json!({ "message": { "text": "x" }, "level": 3 })).unwrap();
        assert_eq!(object.message, json!({ "text": "x" }));
        assert_eq!(object.level_attribute(), Some(AttributeValue::Int(3)));

        let null_level: LogRequest =
            serde_json::from_value(json!({ "message": "hi", "level": null })).unwrap();
        assert_eq!(null_level.level, Value::Null);
        assert_eq!(null_level.level_attribute(), None);

        let payload = LogPayload::new(null_level, "observe-relay", "2024-01-01T00:00:00.000Z".into());
        let envelope = CorrelationEnvelope {
            trace_id: "a".repeat(32),
            span_id: "b".repeat(16),
        };
        let body = payload.to_json(&envelope);
        assert_eq!(body["level"], Value::Null);
        assert_eq!(body["message"], "hi");
    }

    #[test]
    fn test_payload_keeps_caller_metadata() {
        let request: LogRequest = serde_json::from_value(json!({
            "message": "Test log",
            "level": "warn",
            "metadata": { "testId": "123" }
        }))
        .unwrap();
        let payload = LogPayload::new(request, "observe-relay", "2024-01-01T00:00:00.000Z".into());
        let envelope = CorrelationEnvelope {
            trace_id: "a".repeat(32),
            span_id: "b".repeat(16),
        };

        let body = payload.to_json(&envelope);
        assert_eq!(body["level"], "warn");
        assert_eq!(body["service"], "observe-relay");
        assert_eq!(body["metadata"]["testId"], "123");
        assert_eq!(body["metadata"]["traceId"], "a".repeat(32));
        assert_eq!(body["metadata"]["spanId"], "b".repeat(16));
    }
}
