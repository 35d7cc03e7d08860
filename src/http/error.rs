//! Error-to-response mapping for the front service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::downstream::DownstreamError;
use crate::observability::TelemetryError;

/// Errors a handler may return. Each is recorded on the nearest open span
/// before being turned into a response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request input. 400.
    #[error("{message}: {details}")]
    Validation { message: String, details: String },

    /// The downstream call failed or timed out. 502.
    #[error("{message}: {source}")]
    Downstream {
        message: &'static str,
        #[source]
        source: DownstreamError,
    },

    /// Anything else. 500.
    #[error("{message}")]
    Unhandled {
        message: &'static str,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>, details: impl ToString) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: details.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Downstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Unhandled { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TelemetryError> for ApiError {
    fn from(e: TelemetryError) -> Self {
        ApiError::Unhandled {
            message: "Internal server error",
            source: Some(Box::new(e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Validation { message, details } => {
                json!({ "error": message, "details": details })
            }
            ApiError::Downstream { message, source } => {
                json!({ "error": message, "details": source.to_string() })
            }
            ApiError::Unhandled { message, .. } => json!({ "error": message }),
        };
        (self.status(), Json(body)).into_response()
    }
}
