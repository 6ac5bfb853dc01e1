//! Command bus: ordered fan-out of [`Command`]s to every subscriber.
//!
//! Publishing walks the subscriber list under one lock, so every subscriber receives
//! commands in the same global publish order. Channels are unbounded; publishing never
//! waits on a slow subscriber.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::types::Command;

/// Multi-producer, multi-subscriber command channel
#[derive(Clone, Default)]
pub struct CommandBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>>,
}

impl CommandBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every command published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `command` to all live subscribers; dropped subscribers are pruned
    pub fn publish(&self, command: Command) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(command.clone()).is_ok());
        tracing::trace!(?command, subscribers = subscribers.len(), "Command published");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Command>>> {
        // The list stays consistent even if a holder panicked
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
