//! Static process identity attached to every exported record.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment of the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{}' (expected 'development' or 'production')",
                other
            )),
        }
    }
}

/// Immutable service identity. Built once by the telemetry process and shared
/// by all three exporters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    service_name: String,
    service_version: String,
    environment: Environment,
}

impl ResourceDescriptor {
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            environment,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Resource attributes in semantic-convention form.
    pub fn attributes(&self) -> [(&'static str, &str); 3] {
        [
            ("service.name", &self.service_name),
            ("service.version", &self.service_version),
            ("deployment.environment", self.environment.as_str()),
        ]
    }

    /// SDK resource shared by the tracer, meter and logger providers.
    pub fn to_otel(&self) -> Resource {
        Resource::new(
            self.attributes()
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, v.to_string())),
        )
    }
}
