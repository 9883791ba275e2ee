// ABOUTME: Listens for the server shutdown signal, tracked per-task via broadcast

use tokio::sync::broadcast;

/// Tracks whether a shutdown signal has been received. Each task that needs
/// to observe shutdown holds its own `Shutdown`, built from a `subscribe()`
/// on the listener's shared `broadcast::Sender`.
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Wait for the shutdown signal. Idempotent: returns immediately if the
    /// signal has already been received once.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }

    /// A fresh receiver on the same broadcast channel, for spawning a new task.
    pub fn resubscribe(&self) -> broadcast::Receiver<()> {
        self.notify.resubscribe()
    }
}
