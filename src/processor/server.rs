//! Local invocation harness for the log processor.
//!
//! # Responsibilities
//! - Accept invocations as `POST` on any path
//! - Build an invocation context per request
//! - Reply with the handler's status code and raw body
//!
//! # Design Decisions
//! - One fallback handler owns method dispatch, so `POST /health` is an
//!   invocation like any other path
//! - Handler failures are already 500 responses; only undecodable request
//!   bodies are rejected by the harness itself

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::processor::handler::{FunctionResponse, InvocationContext, LogProcessor};

const FUNCTION_NAME: &str = "log-processor-mock";
const FUNCTION_ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:log-processor-mock";

impl InvocationContext {
    /// Context for a locally simulated invocation.
    pub fn mock(function_name: Option<&str>) -> Self {
        let request_id = format!("mock-{}", Utc::now().timestamp_millis());
        Self {
            request_id,
            function_name: function_name.unwrap_or(FUNCTION_NAME).to_string(),
            function_version: "$LATEST".to_string(),
            invoked_function_arn: FUNCTION_ARN.to_string(),
            memory_limit_in_mb: "256".to_string(),
            aws_request_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct HarnessState {
    processor: Arc<LogProcessor>,
    function_name: Option<Arc<str>>,
}

/// HTTP front for [`LogProcessor`].
pub struct InvocationServer {
    router: Router,
}

impl InvocationServer {
    pub fn new(
        processor: LogProcessor,
        function_name: Option<&str>,
        request_timeout: Duration,
    ) -> Self {
        let state = HarnessState {
            processor: Arc::new(processor),
            function_name: function_name.map(Arc::from),
        };
        Self {
            router: Self::build_router(state, request_timeout),
        }
    }

    #[allow(deprecated)]
    fn build_router(state: HarnessState, request_timeout: Duration) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(request_timeout)),
            )
    }

    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %listener.local_addr()?, "Lambda mock server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await
    }
}

async fn dispatch(
    State(state): State<HarnessState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method == Method::GET && uri.path() == "/health" {
        return Json(json!({ "status": "healthy", "service": "lambda-mock" })).into_response();
    }
    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": "Method not allowed" })),
        )
            .into_response();
    }

    let event: Value = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Error processing log");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error", "details": e.to_string() })),
            )
                .into_response();
        }
    };

    let context = InvocationContext::mock(state.function_name.as_deref());
    tracing::info!(request_id = %context.request_id, "Processing log with context");

    let reply = state.processor.handle(event, &context).await;
    tracing::info!(
        request_id = %context.request_id,
        status = reply.status_code,
        "Processing complete"
    );
    function_reply(reply)
}

fn function_reply(reply: FunctionResponse) -> Response {
    let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::OK);
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        reply.body,
    )
        .into_response()
}
