//! Observe Relay Library
//!
//! A front HTTP service and a downstream log processor sharing one
//! telemetry core: spans, metrics and logs exported over OTLP/HTTP, with
//! trace identity carried across the process boundary in the payload.

pub mod config;
pub mod downstream;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod processor;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::TelemetryProcess;
