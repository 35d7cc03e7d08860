//! Shutdown coordination.

use tokio::sync::broadcast;

use crate::lifecycle::signals::wait_for_os_signal;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger on the first SIGTERM/SIGINT.
    pub fn trigger_on_os_signal(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match wait_for_os_signal().await {
                Ok(()) => shutdown.trigger(),
                Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
            }
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
