//! Online/offline signal supplied by the host environment.

use std::sync::Arc;

use tokio::sync::watch;

/// A shared boolean the host flips when network connectivity changes.
///
/// Clones share the same underlying value.
#[derive(Debug, Clone)]
pub struct OnlineSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl OnlineSignal {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the signal. Watchers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            log::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }

    /// Receiver woken on every transition.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for OnlineSignal {
    fn default() -> Self {
        Self::online()
    }
}
