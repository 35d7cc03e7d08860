//! HTTP surface of the front service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs   (Axum setup, timeout and trace layers)
//!     → request.rs  (request counter, duration, in-flight gauge)
//!     → handlers.rs (root span → body → settle)
//!     → error.rs    (ApiError → status code + JSON body)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::RequestMetrics;
pub use server::{AppState, HttpServer, ServerError};
