use std::time::Duration;
use thiserror::Error;

/// A call to a downstream service failed.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {}ms", .timeout.as_millis())]
    Timeout { url: String, timeout: Duration },

    #[error("downstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable downstream reply: {0}")]
    Decode(String),
}

impl DownstreamError {
    pub(crate) fn from_reqwest(url: &str, timeout: Duration, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownstreamError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else {
            DownstreamError::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }
}
