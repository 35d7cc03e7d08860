//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate URLs and value ranges (intervals > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::AppConfig;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_http_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}', expected http or https", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{value}': {e}"))),
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let telemetry = &config.telemetry;
    check_http_url(&mut errors, "telemetry.endpoint", &telemetry.endpoint);
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    check_positive(
        &mut errors,
        "telemetry.metric_export_interval_ms",
        telemetry.metric_export_interval_ms,
    );
    check_positive(
        &mut errors,
        "telemetry.trace_flush_interval_ms",
        telemetry.trace_flush_interval_ms,
    );
    check_positive(
        &mut errors,
        "telemetry.max_export_batch_size",
        telemetry.max_export_batch_size as u64,
    );
    check_positive(&mut errors, "telemetry.export_timeout_ms", telemetry.export_timeout_ms);
    check_positive(
        &mut errors,
        "telemetry.log_queue_capacity",
        telemetry.log_queue_capacity as u64,
    );

    check_positive(
        &mut errors,
        "server.request_timeout_secs",
        config.server.request_timeout_secs,
    );

    check_http_url(&mut errors, "downstream.url", &config.downstream.url);
    check_http_url(&mut errors, "downstream.users_url", &config.downstream.users_url);
    check_positive(&mut errors, "downstream.timeout_ms", config.downstream.timeout_ms);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
