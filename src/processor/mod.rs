//! Downstream log processor.
//!
//! # Data Flow
//! ```text
//! POST (any path)
//!     → server.rs  (decode body, build invocation context)
//!     → handler.rs (root span, upstream ids, enrich, metrics)
//!     → {statusCode, body} written back as the HTTP reply
//! ```

pub mod handler;
pub mod server;

pub use handler::{decode_event, FunctionResponse, InvocationContext, LogProcessor, ProcessorError};
pub use server::InvocationServer;
