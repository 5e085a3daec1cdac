//! Shutdown coordination for the gateway.
//!
//! One broadcast sender fans the stop signal out to every long-running
//! task. Receivers treat a message and a closed channel the same way,
//! so dropping the coordinator also winds everything down.

use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Shutdown {
    signal: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        // Capacity 1 is enough: the payload carries no data and a
        // second trigger has nothing left to say.
        let (signal, _) = broadcast::channel(1);
        Self { signal }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal.subscribe()
    }

    /// Fire the signal. Safe to call more than once.
    pub fn trigger(&self) {
        let _ = self.signal.send(());
    }

    /// Tasks still holding a live receiver.
    pub fn pending_tasks(&self) -> usize {
        self.signal.receiver_count()
    }

    /// Trip the signal when the process receives Ctrl+C.
    pub fn trigger_on_ctrl_c(self: &Arc<Self>) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, shutting down");
            }
            shutdown.trigger();
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
