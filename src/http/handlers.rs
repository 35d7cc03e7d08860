//! Front service endpoints.
//!
//! Every traced endpoint follows the same shape: open a root span, run the
//! body as an inner fn borrowing the span, then settle the span with the
//! body's result. Child spans wrap distinct units of work and are settled
//! the same way, so an error is recorded on every span it passes through.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::downstream::{LogPayload, LogRequest};
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::observability::{AttributeValue, CorrelationEnvelope, Span};
use crate::pipeline::{iso_timestamp, settle};

/// Simulated work inside `POST /api/process`.
const PROCESSING_TIME: Duration = Duration::from_millis(150);

const INVALID_BODY: &str = "Invalid request body";

/// An empty body reads as `{}`.
fn parse_json_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::validation(INVALID_BODY, e))
}

pub async fn health() -> Json<Value> {
    tracing::info!(path = "/health", "Health check requested");
    Json(json!({ "status": "healthy", "timestamp": iso_timestamp() }))
}

pub async fn get_users(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut span = state.tracker.start_span("get_users", None);
    let result = fetch_users(&state, &mut span).await;
    settle(span, result).map(Json)
}

async fn fetch_users(state: &AppState, span: &mut Span) -> Result<Value, ApiError> {
    let ctx = span.context();
    tracing::info!(
        operation = "get_users",
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Fetching users"
    );

    let child = state.tracker.start_span_with(
        "fetch_external_api",
        Some(&ctx),
        [
            ("http.method", AttributeValue::from("GET")),
            ("http.url", AttributeValue::from(state.users.url())),
        ],
    );
    let users = settle(child, state.users.fetch().await).map_err(|e| {
        tracing::error!(error = %e, trace_id = %ctx.trace_id, "Failed to fetch users");
        ApiError::Unhandled {
            message: "Failed to fetch users",
            source: Some(Box::new(e)),
        }
    })?;

    let count = users.len();
    span.set_attribute("users.count", count)?;
    tracing::info!(count, trace_id = %ctx.trace_id, "Users fetched successfully");

    let first: Vec<Value> = users.into_iter().take(3).collect();
    Ok(json!({ "success": true, "count": count, "users": first }))
}

pub async fn process_data(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut span = state.tracker.start_span("process_data", None);
    let result = process_items(&state, &mut span, &body).await;
    settle(span, result).map(Json)
}

async fn process_items(state: &AppState, span: &mut Span, body: &[u8]) -> Result<Value, ApiError> {
    let body = parse_json_body(body)?;
    let items = match body.get("data") {
        None | Some(Value::Null) => 0,
        Some(Value::Array(data)) => data.len(),
        Some(other) => {
            return Err(ApiError::validation(
                INVALID_BODY,
                format!("'data' must be an array, got {other}"),
            ))
        }
    };

    let ctx = span.context();
    tracing::info!(
        operation = "process_data",
        data_size = items,
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Processing data"
    );
    span.set_attribute("data.size", items)?;

    let mut child = state.tracker.start_span("data_processing", Some(&ctx));
    tokio::time::sleep(PROCESSING_TIME).await;
    child.set_attribute("processing.time_ms", PROCESSING_TIME.as_millis() as i64)?;
    settle(child, Ok::<_, ApiError>(()))?;

    span.set_attribute("result.items", items)?;
    tracing::info!(items, trace_id = %ctx.trace_id, "Data processed successfully");

    Ok(json!({ "processed": true, "timestamp": iso_timestamp(), "items": items }))
}

pub async fn metrics_demo(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut span = state.tracker.start_span("metrics_demo", None);
    let result = publish_demo_value(&state, &mut span);
    settle(span, result).map(Json)
}

/// The value is sampled by the `demo_random_value` gauge on the next cycle.
fn publish_demo_value(state: &AppState, span: &mut Span) -> Result<Value, ApiError> {
    let value: u64 = rand::thread_rng().gen_range(0..100);
    state.demo_value.store(value, Ordering::Relaxed);
    span.set_attribute("demo.value", value)?;

    let ctx = span.context();
    tracing::info!(value, trace_id = %ctx.trace_id, "Metrics demo generated");

    Ok(json!({
        "success": true,
        "randomValue": value,
        "message": "Metrics generated successfully",
    }))
}

pub async fn logs_to_lambda(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut span = state.tracker.start_span_with(
        "send_logs_to_lambda",
        None,
        [("lambda.url", AttributeValue::from(state.lambda.url()))],
    );
    let result = send_logs(&state, &mut span, &body).await;
    settle(span, result).map(Json)
}

async fn send_logs(state: &AppState, span: &mut Span, body: &[u8]) -> Result<Value, ApiError> {
    let request: LogRequest = serde_json::from_value(parse_json_body(body)?)
        .map_err(|e| ApiError::validation(INVALID_BODY, e))?;
    if let Some(level) = request.level_attribute() {
        span.set_attribute("log.level", level)?;
    }

    let ctx = span.context();
    tracing::info!(
        operation = "send_logs_to_lambda",
        log_message = %request.message,
        level = %request.level,
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Sending logs to Lambda"
    );

    let child = state.tracker.start_span_with(
        "invoke_log_processor",
        Some(&ctx),
        [("lambda.url", AttributeValue::from(state.lambda.url()))],
    );
    let envelope = CorrelationEnvelope::from_span(&child);
    let payload = LogPayload::new(request, state.service_name.as_ref(), iso_timestamp())
        .to_json(&envelope);

    let reply = settle(child, state.lambda.invoke(&payload).await).map_err(|source| {
        tracing::error!(
            error = %source,
            url = %state.lambda.url(),
            trace_id = %ctx.trace_id,
            "Failed to send logs to Lambda"
        );
        ApiError::Downstream {
            message: "Failed to send logs to Lambda",
            source,
        }
    })?;

    span.set_attribute("lambda.response.status", reply.status)?;
    tracing::info!(
        status = reply.status,
        trace_id = %ctx.trace_id,
        "Logs sent to Lambda successfully"
    );

    Ok(json!({
        "success": true,
        "message": "Logs sent to Lambda",
        "lambdaResponse": reply.body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_body() {
        assert_eq!(parse_json_body(b"").unwrap(), json!({}));
        assert_eq!(parse_json_body(b"  \n").unwrap(), json!({}));
        assert_eq!(parse_json_body(br#"{"data":[1]}"#).unwrap(), json!({ "data": [1] }));

        let err = parse_json_body(b"{not json").unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
