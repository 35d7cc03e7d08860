//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the logging subscriber with the OTLP log bridge
//! - Build and initialize the telemetry process
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Logging is installed before telemetry starts so its startup is logged
//! - Listeners are bound by the caller, after this returns

use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, LogFormat};
use crate::observability::{
    init_logging, LogConfig, OtlpLogLayer, TelemetryError, TelemetryProcess,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Install logging and start telemetry for a binary whose events live under
/// `log_targets`.
pub fn start_telemetry(
    config: &AppConfig,
    log_targets: &[&str],
) -> Result<Arc<TelemetryProcess>, StartupError> {
    let telemetry = Arc::new(TelemetryProcess::new(config.telemetry.to_settings()));

    let log_config = LogConfig {
        level: config.logging.level.clone(),
        json: config.logging.format == LogFormat::Json,
    };
    let bridge = OtlpLogLayer::new(telemetry.log_sink(), log_targets.iter().copied());
    init_logging(&log_config, Some(bridge))?;

    telemetry.initialize()?;
    Ok(telemetry)
}
