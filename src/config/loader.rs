//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::{AppConfig, LogFormat, Role};
use crate::config::validation::{validate_config, ValidationError};
use crate::observability::Environment;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render defaults: {0}")]
    Defaults(#[from] toml::ser::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration for `role`: built-in defaults, then the optional TOML
/// file, then environment overrides, then validation.
pub fn load_config(
    role: Role,
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_with_defaults(role, &content)?
        }
        None => AppConfig::defaults_for(role),
    };

    let mut errors = apply_env_overrides(role, &mut config, env);
    if let Err(invalid) = validate_config(&config) {
        errors.extend(invalid);
    }
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }
    Ok(config)
}

/// Load using the process environment.
pub fn load_from_env(role: Role, path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_config(role, path, |key| std::env::var(key).ok())
}

/// Overlay a TOML document on the role's defaults. Keys missing from the
/// file keep the role default rather than the generic one.
pub fn parse_with_defaults(role: Role, content: &str) -> Result<AppConfig, ConfigError> {
    let mut base = toml::Value::try_from(AppConfig::defaults_for(role))?;
    let overlay: toml::Value = toml::from_str(content)?;
    merge(&mut base, overlay);
    Ok(base.try_into()?)
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parsed<T: FromStr>(
    errors: &mut Vec<ValidationError>,
    var: &str,
    raw: String,
    describe: &str,
) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(ValidationError::new(var, format!("expected {describe}, got '{raw}'")));
            None
        }
    }
}

/// Apply environment variables. Returns unparseable values as errors.
pub fn apply_env_overrides(
    role: Role,
    config: &mut AppConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(v) = env("OBSERVE_ENDPOINT") {
        config.telemetry.endpoint = v;
    }
    if let Some(v) = env("OBSERVE_TOKEN") {
        config.telemetry.token = v;
    }
    if let Some(v) = env("SERVICE_NAME") {
        config.telemetry.service_name = v;
    }
    if let Some(v) = env("SERVICE_VERSION") {
        config.telemetry.service_version = v;
    }
    if let Some(v) = env("DEPLOYMENT_ENVIRONMENT") {
        match v.parse::<Environment>() {
            Ok(environment) => config.telemetry.environment = environment,
            Err(e) => errors.push(ValidationError::new("DEPLOYMENT_ENVIRONMENT", e)),
        }
    }
    if let Some(v) = env("METRIC_EXPORT_INTERVAL_MS") {
        if let Some(ms) = parsed(&mut errors, "METRIC_EXPORT_INTERVAL_MS", v, "milliseconds") {
            config.telemetry.metric_export_interval_ms = ms;
        }
    }
    if let Some(v) = env("PORT") {
        if let Some(port) = parsed(&mut errors, "PORT", v, "a port number") {
            config.server.port = port;
        }
    }
    if let Some(v) = env("LAMBDA_LOG_URL") {
        config.downstream.url = v;
    }
    if let Some(v) = env("USERS_API_URL") {
        config.downstream.users_url = v;
    }
    if let Some(v) = env("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = env("LOG_FORMAT") {
        match v.trim().to_ascii_lowercase().as_str() {
            "json" => config.logging.format = LogFormat::Json,
            "pretty" => config.logging.format = LogFormat::Pretty,
            _ => errors.push(ValidationError::new(
                "LOG_FORMAT",
                format!("expected 'json' or 'pretty', got '{v}'"),
            )),
        }
    }
    if let Some(v) = env("AWS_REGION") {
        config.processor.aws_region = v;
    }
    if role == Role::Processor {
        if let Some(name) = env("AWS_LAMBDA_FUNCTION_NAME").filter(|n| !n.is_empty()) {
            config.processor.function_name = Some(name);
            config.telemetry.environment = Environment::Production;
        }
    }

    errors
}
