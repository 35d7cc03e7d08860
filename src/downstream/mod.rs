//! Outbound calls made by the front service.
//!
//! # Responsibilities
//! - Build the log payload sent to the log processor
//! - Invoke the log processor and unwrap its `{statusCode, body}` reply
//! - Fetch the external user directory
//!
//! # Design Decisions
//! - Every failure mode (connect, timeout, non-2xx, bad reply) is one
//!   `DownstreamError`, surfaced to clients as 502
//! - Trace identity travels only inside the payload `metadata`

pub mod client;
pub mod error;
pub mod payload;

pub use client::{LambdaReply, LogProcessorClient, UsersClient};
pub use error::DownstreamError;
pub use payload::{LogPayload, LogRequest};
