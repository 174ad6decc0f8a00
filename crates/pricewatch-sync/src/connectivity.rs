//! Connectivity signal.
//!
//! One authoritative online/offline boolean. Writers report observed
//! transitions (the application wires stream lifecycle into this);
//! subscribers see each transition exactly once via the watch channel,
//! which is what makes redundant reports safe.

use tokio::sync::watch;
use tracing::info;

/// Shared online/offline state with transition notifications.
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online }
    }

    /// Report the current connectivity. Returns true when this call was
    /// an actual transition; repeated reports of the same state change
    /// nothing and wake nobody.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Watch transitions. The receiver also exposes the current value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redundant_reports_are_not_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());

        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow_and_update());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
