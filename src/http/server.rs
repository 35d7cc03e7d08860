//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request metrics)
//! - Register the startup-time gauges
//! - Bind server to listener and drain on shutdown

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::downstream::{LogProcessorClient, UsersClient};
use crate::http::handlers;
use crate::http::request::{track_requests, RequestMetrics};
use crate::observability::metrics::{BatchObserver, CallbackRegistration};
use crate::observability::{Meter, SpanTracker, TelemetryError, TelemetryProcess};

/// Stored in the demo slot until `/api/metrics-demo` is first called.
const NO_SAMPLE: u64 = u64::MAX;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub tracker: SpanTracker,
    pub service_name: Arc<str>,
    pub users: UsersClient,
    pub lambda: LogProcessorClient,
    /// Latest `/api/metrics-demo` value, read by the demo gauge callback.
    pub demo_value: Arc<AtomicU64>,
}

/// HTTP server for the front service.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    request_metrics: RequestMetrics,
    _demo_gauge: CallbackRegistration,
}

impl HttpServer {
    /// Build the server. `telemetry` must already be initialized.
    pub fn new(config: AppConfig, telemetry: &TelemetryProcess) -> Result<Self, ServerError> {
        let tracker = telemetry.tracker()?;
        let meter = telemetry.meter(&config.telemetry.service_name)?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("observe-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let downstream_timeout = Duration::from_millis(config.downstream.timeout_ms);
        let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

        let demo_value = Arc::new(AtomicU64::new(NO_SAMPLE));
        let demo_gauge = register_demo_gauge(&meter, demo_value.clone());
        let request_metrics = RequestMetrics::register(&meter);

        let state = AppState {
            tracker,
            service_name: Arc::from(config.telemetry.service_name.as_str()),
            users: UsersClient::new(client.clone(), &config.downstream.users_url, request_timeout),
            lambda: LogProcessorClient::new(client, &config.downstream.url, downstream_timeout),
            demo_value,
        };

        let router = Self::build_router(&config, state, request_metrics.clone());
        Ok(Self {
            router,
            config,
            request_metrics,
            _demo_gauge: demo_gauge,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState, metrics: RequestMetrics) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/users", get(handlers::get_users))
            .route("/api/process", post(handlers::process_data))
            .route("/api/metrics-demo", get(handlers::metrics_demo))
            .route("/api/logs-to-lambda", post(handlers::logs_to_lambda))
            .with_state(state)
            .layer(middleware::from_fn_with_state(metrics, track_requests))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.server.request_timeout_secs,
                    ))),
            )
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.telemetry.service_name,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!(
            in_flight = self.request_metrics.in_flight(),
            "HTTP server stopped"
        );
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// `demo_random_value{source=demo}`, fed by one batch callback registered at
/// startup so repeated demo calls never add callbacks.
fn register_demo_gauge(meter: &Meter, value: Arc<AtomicU64>) -> CallbackRegistration {
    let gauge = meter.observable_gauge("demo_random_value", "Random demo value");
    let target = gauge.clone();
    meter.batch_callback(
        &[&gauge],
        Arc::new(move |observer: &mut BatchObserver| {
            let current = value.load(Ordering::Relaxed);
            if current != NO_SAMPLE {
                observer.observe(&target, current as f64, &[("source", "demo")]);
            }
        }),
    )
}
