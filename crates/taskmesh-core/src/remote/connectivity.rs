//! Network availability signal

use std::sync::Arc;

use tokio::sync::watch;

/// Boolean observable: is the remote service reachable right now?
///
/// Whoever owns platform reachability calls [`Connectivity::set_available`];
/// the engine reads the current value and the orchestrator listens for
/// unavailable→available transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(available: bool) -> Self {
        let (tx, _rx) = watch::channel(available);
        Self { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish the current reachability. Returns whether it changed.
    pub fn set_available(&self, available: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == available {
                false
            } else {
                *current = available;
                true
            }
        });
        if changed {
            tracing::info!(available, "Connectivity changed");
        }
        changed
    }

    /// Watch for changes; each `changed()` wake-up is one became-available
    /// or became-unavailable event.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
