//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Install logging → Initialize telemetry → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!     → TelemetryProcess::shutdown() (traces, metrics, logs) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then telemetry, then listeners
//! - Ordered shutdown: stop accept, drain, flush telemetry
//! - Telemetry flush is bounded: each exporter step has a timeout

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start_telemetry, StartupError};
