//! Shared utilities for integration tests: a recording OTLP collector,
//! programmable backends and service launchers.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use observe_relay::config::{AppConfig, Role};
use observe_relay::http::HttpServer;
use observe_relay::lifecycle::Shutdown;
use observe_relay::observability::{Environment, ResourceDescriptor, TelemetryProcess, TelemetrySettings};
use observe_relay::processor::{InvocationServer, LogProcessor};

/// One request received by the collector.
#[derive(Debug, Clone)]
pub struct Export {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Span flattened out of an OTLP trace export.
#[derive(Debug, Clone)]
pub struct CollectedSpan {
    pub service: String,
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub status_code: u64,
    pub attributes: Value,
}

impl CollectedSpan {
    /// Attribute value with its OTLP type wrapper removed.
    pub fn attr(&self, key: &str) -> Option<Value> {
        self.attributes
            .as_array()?
            .iter()
            .find(|kv| kv["key"] == key)
            .and_then(|kv| plain(&kv["value"]))
    }
}

/// Strip OTLP/JSON `AnyValue` wrappers: `{"stringValue": "x"}` becomes
/// `"x"`, and 64-bit integers encoded as strings become numbers.
pub fn plain(value: &Value) -> Option<Value> {
    let Value::Object(fields) = value else {
        return Some(value.clone());
    };
    let (key, inner) = fields.iter().next()?;
    match key.as_str() {
        "intValue" => match inner {
            Value::String(s) => s.parse::<i64>().ok().map(Value::from),
            other => Some(other.clone()),
        },
        "stringValue" | "doubleValue" | "boolValue" => Some(inner.clone()),
        "value" => plain(inner),
        _ => Some(value.clone()),
    }
}

/// Numeric value of a metric data point, encoded as `asDouble` or `asInt`.
pub fn point_value(point: &Value) -> Option<f64> {
    let number = |v: &Value| match v {
        Value::String(s) => s.parse::<f64>().ok(),
        other => other.as_f64(),
    };
    point
        .get("asDouble")
        .or_else(|| point.get("asInt"))
        .and_then(number)
        .or_else(|| point.get("value").and_then(point_value))
}

/// Data points of an exported metric, whatever its type.
pub fn data_points(metric: &Value) -> Vec<Value> {
    let data = metric.get("data").unwrap_or(metric);
    ["sum", "gauge", "histogram"]
        .iter()
        .find_map(|kind| data[kind]["dataPoints"].as_array())
        .cloned()
        .unwrap_or_default()
}

/// Span status code, numeric or in its enum-name form.
fn status_code(status: &Value) -> u64 {
    match &status["code"] {
        Value::String(name) => match name.as_str() {
            "STATUS_CODE_OK" => 1,
            "STATUS_CODE_ERROR" => 2,
            _ => 0,
        },
        other => other.as_u64().unwrap_or_default(),
    }
}

/// Non-empty hex id, or `None` for the all-empty encoding of a missing id.
fn hex_id(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty() && s.chars().any(|c| c != '0'))
        .map(str::to_string)
}

#[derive(Clone, Default)]
struct CollectorState {
    exports: Arc<Mutex<Vec<Export>>>,
    log_delay: Option<Duration>,
}

/// In-process OTLP/HTTP collector that records every request in order.
#[derive(Clone)]
pub struct MockCollector {
    pub addr: SocketAddr,
    exports: Arc<Mutex<Vec<Export>>>,
}

impl MockCollector {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Responses to `/v1/logs` are held back by `log_delay`.
    pub async fn start_with(log_delay: Option<Duration>) -> Self {
        let state = CollectorState {
            exports: Arc::default(),
            log_delay,
        };
        let exports = state.exports.clone();
        let app = Router::new().fallback(record).with_state(state);
        let addr = serve(app).await;
        Self { addr, exports }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn exports(&self) -> Vec<Export> {
        self.exports.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.exports().into_iter().map(|e| e.path).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.exports().iter().filter(|e| e.path == path).count()
    }

    pub fn spans(&self) -> Vec<CollectedSpan> {
        let mut out = Vec::new();
        for export in self.exports().iter().filter(|e| e.path == "/v1/traces") {
            for resource_spans in export.body["resourceSpans"].as_array().into_iter().flatten() {
                let service = resource_attr(&resource_spans["resource"], "service.name");
                for scope in resource_spans["scopeSpans"].as_array().into_iter().flatten() {
                    for span in scope["spans"].as_array().into_iter().flatten() {
                        out.push(CollectedSpan {
                            service: service.clone(),
                            name: span["name"].as_str().unwrap_or_default().to_string(),
                            trace_id: span["traceId"].as_str().unwrap_or_default().to_string(),
                            span_id: span["spanId"].as_str().unwrap_or_default().to_string(),
                            parent_span_id: hex_id(&span["parentSpanId"]),
                            status_code: status_code(&span["status"]),
                            attributes: span["attributes"].clone(),
                        });
                    }
                }
            }
        }
        out
    }

    pub fn span(&self, name: &str) -> Option<CollectedSpan> {
        self.spans().into_iter().find(|s| s.name == name)
    }

    /// Every exported metric entry with this name, oldest first.
    pub fn metrics(&self, name: &str) -> Vec<Value> {
        let mut out = Vec::new();
        for export in self.exports().iter().filter(|e| e.path == "/v1/metrics") {
            for resource in export.body["resourceMetrics"].as_array().into_iter().flatten() {
                for scope in resource["scopeMetrics"].as_array().into_iter().flatten() {
                    for metric in scope["metrics"].as_array().into_iter().flatten() {
                        if metric["name"] == name {
                            out.push(metric.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Log record bodies, in export order.
    pub fn log_bodies(&self) -> Vec<String> {
        let mut out = Vec::new();
        for export in self.exports().iter().filter(|e| e.path == "/v1/logs") {
            for resource in export.body["resourceLogs"].as_array().into_iter().flatten() {
                for scope in resource["scopeLogs"].as_array().into_iter().flatten() {
                    for record in scope["logRecords"].as_array().into_iter().flatten() {
                        if let Some(Value::String(body)) = plain(&record["body"]) {
                            out.push(body);
                        }
                    }
                }
            }
        }
        out
    }

    /// Poll until `predicate` holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if predicate(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        predicate(self)
    }
}

fn resource_attr(resource: &Value, key: &str) -> String {
    resource["attributes"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|kv| kv["key"] == key)
        .and_then(|kv| plain(&kv["value"]))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

async fn record(
    State(state): State<CollectorState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let export = Export {
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        path: path.clone(),
    };
    state.exports.lock().unwrap().push(export);

    if path == "/v1/logs" {
        if let Some(delay) = state.log_delay {
            tokio::time::sleep(delay).await;
        }
    }
    (StatusCode::OK, "{}")
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend whose every response comes from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Value)> + Send + 'static,
{
    let f = Arc::new(f);
    let app = Router::new().fallback(move |body: Bytes| {
        let f = f.clone();
        async move {
            let request = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let (status, body) = f(request).await;
            (
                StatusCode::from_u16(status).unwrap(),
                axum::Json(body),
            )
        }
    });
    serve(app).await
}

/// Start a backend that returns a fixed JSON body.
pub async fn start_mock_backend(body: Value) -> SocketAddr {
    start_programmable_backend(move |_| {
        let body = body.clone();
        async move { (200, body) }
    })
    .await
}

/// A listener that accepts connections into the backlog and never answers.
pub async fn start_black_hole() -> (SocketAddr, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    (listener.local_addr().unwrap(), listener)
}

/// Telemetry settings with short periods suitable for tests.
pub fn settings(service: &str, endpoint: &str) -> TelemetrySettings {
    let mut settings = TelemetrySettings::new(
        ResourceDescriptor::new(service, "1.0.0", Environment::Development),
        endpoint,
    );
    settings.metric_export_interval = Duration::from_secs(60);
    settings.trace_flush_interval = Duration::from_millis(50);
    settings.export_timeout = Duration::from_secs(2);
    settings
}

pub fn telemetry(settings: TelemetrySettings) -> Arc<TelemetryProcess> {
    let telemetry = Arc::new(TelemetryProcess::new(settings));
    telemetry.initialize().unwrap();
    telemetry
}

/// Front service config pointed at the given backends.
pub fn front_config(collector: &MockCollector, users_url: &str, lambda_url: &str) -> AppConfig {
    let mut config = AppConfig::defaults_for(Role::Front);
    config.telemetry.endpoint = collector.endpoint();
    config.downstream.users_url = users_url.to_string();
    config.downstream.url = lambda_url.to_string();
    config.downstream.timeout_ms = 500;
    config
}

/// Spawn the front service on an ephemeral port.
pub async fn spawn_front(config: AppConfig, telemetry: &TelemetryProcess) -> (String, Shutdown) {
    let server = HttpServer::new(config, telemetry).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (format!("http://{addr}"), shutdown)
}

/// Spawn the log processor harness on an ephemeral port.
pub async fn spawn_processor(telemetry: &TelemetryProcess) -> (String, Shutdown) {
    let processor = LogProcessor::new(telemetry, "us-east-1").unwrap();
    let server = InvocationServer::new(processor, None, Duration::from_secs(30));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (format!("http://{addr}"), shutdown)
}

pub fn users(count: usize) -> Value {
    Value::Array(
        (1..=count)
            .map(|id| serde_json::json!({ "id": id, "name": format!("User {id}") }))
            .collect(),
    )
}
