//! Stop signal shared by the node driver and every validator agent.

use tokio::sync::broadcast;

/// Tasks `subscribe` and `select!` on the receiver next to their main loop.
/// Dropping the controller also stops them: their receivers see `Closed`.
#[derive(Debug)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
