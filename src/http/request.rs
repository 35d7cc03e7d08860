//! Per-request metrics.
//!
//! # Responsibilities
//! - Count requests by method, route and status code
//! - Record request duration by method and route
//! - Track in-flight requests for the `http_active_connections` gauge
//!
//! # Design Decisions
//! - Route is the matched route template, or the fixed `unmatched` label so
//!   arbitrary paths cannot grow the label set
//! - The in-flight count is an atomic read by a gauge callback, so request
//!   code never touches the gauge itself

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::observability::{Counter, Histogram, Meter, ObservableGauge, Observation};

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Instruments shared by every request.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    requests: Counter,
    duration: Histogram,
    in_flight: Arc<AtomicI64>,
    _active: ObservableGauge,
}

impl RequestMetrics {
    pub fn register(meter: &Meter) -> Self {
        let in_flight = Arc::new(AtomicI64::new(0));
        let sampled = in_flight.clone();
        let active = meter.gauge(
            "http_active_connections",
            "Number of active HTTP connections",
            move || vec![Observation::new(sampled.load(Ordering::Relaxed) as f64, &[])],
        );

        Self {
            requests: meter.counter("http_requests_total", "Total number of HTTP requests"),
            duration: meter.histogram(
                "http_request_duration_ms",
                "Duration of HTTP requests in milliseconds",
            ),
            in_flight,
            _active: active,
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Decrements the in-flight count on drop, including on cancellation.
struct InFlightGuard(Arc<AtomicI64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn route_label(matched: Option<&MatchedPath>) -> String {
    matched
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

pub async fn track_requests(
    State(metrics): State<RequestMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = InFlightGuard::enter(&metrics.in_flight);
    let started = Instant::now();

    let method = request.method().to_string();
    let route = route_label(request.extensions().get::<MatchedPath>());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    // Both inputs are always finite and non-negative.
    let _ = metrics.requests.add(
        1.0,
        &[
            ("method", method.as_str()),
            ("route", route.as_str()),
            ("status_code", status.as_str()),
        ],
    );
    let _ = metrics
        .duration
        .record(elapsed_ms, &[("method", method.as_str()), ("route", route.as_str())]);

    response
}
