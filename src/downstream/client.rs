//! HTTP clients for the log processor and the user directory.

use serde_json::Value;
use std::time::Duration;

use crate::downstream::error::DownstreamError;

/// Decoded reply from the log processor.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaReply {
    /// Function status code, taken from the envelope when present.
    pub status: u16,
    pub body: Value,
}

/// Invokes the log processor with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct LogProcessorClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl LogProcessorClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn invoke(&self, payload: &Value) -> Result<LambdaReply, DownstreamError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownstreamError::from_reqwest(&self.url, self.timeout, e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| DownstreamError::from_reqwest(&self.url, self.timeout, e))?;

        if !(200..300).contains(&status) {
            return Err(DownstreamError::Status { status, body: text });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| DownstreamError::Decode(format!("{e}: {text}")))?;
        unwrap_envelope(status, value)
    }
}

/// Accept either a bare body or a `{statusCode, body}` function envelope.
pub fn unwrap_envelope(http_status: u16, value: Value) -> Result<LambdaReply, DownstreamError> {
    let status_code = value
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());

    let (Some(status), Some(body)) = (status_code, value.get("body")) else {
        return Ok(LambdaReply {
            status: http_status,
            body: value,
        });
    };

    let body = match body {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| body.clone()),
        other => other.clone(),
    };

    if !(200..300).contains(&status) {
        return Err(DownstreamError::Status {
            status,
            body: body.to_string(),
        });
    }
    Ok(LambdaReply { status, body })
}

/// Fetches the external user list.
#[derive(Debug, Clone)]
pub struct UsersClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl UsersClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Vec<Value>, DownstreamError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownstreamError::from_reqwest(&self.url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| DownstreamError::Decode(e.to_string()))
    }
}
