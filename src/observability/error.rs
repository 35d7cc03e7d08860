//! Telemetry error types.

use thiserror::Error;

/// Errors surfaced by the telemetry core to its callers.
///
/// Export failures never appear here: the SDK processors absorb them.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A tracker, meter or logger was requested before `initialize()`.
    #[error("telemetry has not been initialized")]
    NotInitialized,

    /// The process has already been shut down and cannot be restarted.
    #[error("telemetry has been shut down")]
    ShutDown,

    /// Attempted to mutate a span after it ended.
    #[error("span '{0}' has already ended")]
    SpanEnded(String),

    /// A measurement was rejected (negative counter increment, NaN, ...).
    #[error("invalid measurement for '{instrument}': {reason}")]
    Validation {
        instrument: String,
        reason: String,
    },

    /// An OTLP exporter or provider could not be built.
    #[error("failed to build exporter: {0}")]
    ExporterInit(String),

    /// The global subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}
