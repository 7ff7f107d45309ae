use tokio::sync::broadcast;
use tracing::info;

/// Drives the ordered, idempotent shutdown sequence (spec §5): stop
/// accepting HTTP requests, stop the bus sweeper, disconnect the gateway,
/// close the registry. Each stage is cheap and safe to call more than once.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Broadcasts the shutdown signal. Safe to call more than once; only the
    /// first call has any effect on receivers still waiting.
    pub fn trigger(&self) {
        info!("shutdown signal received");
        let _ = self.tx.send(());
    }

    /// Waits for ctrl-c, then triggers shutdown.
    pub async fn wait_for_ctrl_c(self) {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        self.trigger();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
