//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers
//! - Resolve once either arrives
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Non-Unix targets only listen for Ctrl+C

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn wait_for_os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}
