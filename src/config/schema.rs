//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Defaults differ per binary, see [`Role`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::observability::{Environment, ResourceDescriptor, TelemetrySettings};

/// Which binary the configuration is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Front HTTP service.
    Front,
    /// Downstream log-processing function.
    Processor,
}

/// Root configuration shared by both services.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Collector connection and resource identity.
    pub telemetry: TelemetryConfig,

    /// Listener settings.
    pub server: ServerConfig,

    /// Outbound calls made by the front service.
    pub downstream: DownstreamConfig,

    pub logging: LoggingConfig,

    /// Settings only read by the log processor.
    pub processor: ProcessorConfig,
}

impl AppConfig {
    /// Built-in defaults for `role`.
    pub fn defaults_for(role: Role) -> Self {
        match role {
            Role::Front => Self::default(),
            Role::Processor => Self {
                telemetry: TelemetryConfig {
                    service_name: "lambda-log-processor".to_string(),
                    metric_export_interval_ms: 5_000,
                    ..TelemetryConfig::default()
                },
                server: ServerConfig {
                    port: 9000,
                    ..ServerConfig::default()
                },
                ..Self::default()
            },
        }
    }
}

/// Telemetry export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Collector base URL; signals are posted to `{endpoint}/v1/{signal}`.
    pub endpoint: String,

    /// Bearer token. Empty means no `Authorization` header.
    pub token: String,

    pub service_name: String,
    pub service_version: String,
    pub environment: Environment,

    /// Metric reader period in milliseconds.
    pub metric_export_interval_ms: u64,

    /// Trace processor period in milliseconds.
    pub trace_flush_interval_ms: u64,

    /// Queued spans that trigger an early trace export.
    pub max_export_batch_size: usize,

    /// Per-request export timeout, also the bound on each shutdown step.
    pub export_timeout_ms: u64,

    /// Log records buffered ahead of the log exporter before new ones are
    /// dropped.
    pub log_queue_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://collect.observeinc.com/v1/otlp".to_string(),
            token: String::new(),
            service_name: "observe-relay".to_string(),
            service_version: "1.0.0".to_string(),
            environment: Environment::Development,
            metric_export_interval_ms: 10_000,
            trace_flush_interval_ms: 5_000,
            max_export_batch_size: 512,
            export_timeout_ms: 5_000,
            log_queue_capacity: 2048,
        }
    }
}

impl TelemetryConfig {
    pub fn resource(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(&self.service_name, &self.service_version, self.environment)
    }

    pub fn to_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            resource: self.resource(),
            endpoint: self.endpoint.clone(),
            token: Some(self.token.clone()).filter(|t| !t.is_empty()),
            metric_export_interval: Duration::from_millis(self.metric_export_interval_ms),
            trace_flush_interval: Duration::from_millis(self.trace_flush_interval_ms),
            max_export_batch_size: self.max_export_batch_size,
            export_timeout: Duration::from_millis(self.export_timeout_ms),
            log_queue_capacity: self.log_queue_capacity,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Outbound call configuration for the front service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Log processor invocation URL.
    pub url: String,

    /// Upstream user directory.
    pub users_url: String,

    /// Timeout for the log processor call in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000".to_string(),
            users_url: "https://jsonplaceholder.typicode.com/users".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log processor runtime context.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub aws_region: String,

    /// Set when running inside the function runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            aws_region: "us-east-1".to_string(),
            function_name: None,
        }
    }
}
