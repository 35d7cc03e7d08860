//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! built-in defaults (per Role)
//!     → loader.rs (optional TOML file overlay)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Every bad value is reported in one error

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AppConfig, DownstreamConfig, LogFormat, LoggingConfig, ProcessorConfig, Role, ServerConfig,
    TelemetryConfig,
};
pub use validation::ValidationError;
