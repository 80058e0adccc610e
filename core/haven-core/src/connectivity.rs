//! Online/offline transition tracking.
//!
//! The platform pushes raw connectivity signals in whatever cadence it likes,
//! including repeats of the current state. `ConnectivityMonitor` collapses
//! those into clean transitions: dependents see each offline→online or
//! online→offline edge exactly once.

use tracing::info;

/// A deduplicated connectivity edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityTransition {
    CameOnline,
    WentOffline,
}

/// Tracks the last known connectivity state.
///
/// Starts offline: the first `set_online(true)` reports `CameOnline`, which
/// conveniently triggers an initial sync pass on startup.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: bool,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        ConnectivityMonitor { online: false }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Records a platform connectivity signal. Returns the transition if the
    /// state actually changed; duplicate same-state signals return `None`.
    pub fn set_online(&mut self, online: bool) -> Option<ConnectivityTransition> {
        if online == self.online {
            return None;
        }
        self.online = online;
        if online {
            info!("Connectivity restored");
            Some(ConnectivityTransition::CameOnline)
        } else {
            info!("Connectivity lost");
            Some(ConnectivityTransition::WentOffline)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_offline() {
        let monitor = ConnectivityMonitor::new();
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_transition_reported_once() {
        let mut monitor = ConnectivityMonitor::new();
        assert_eq!(
            monitor.set_online(true),
            Some(ConnectivityTransition::CameOnline)
        );
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(
            monitor.set_online(false),
            Some(ConnectivityTransition::WentOffline)
        );
        assert_eq!(monitor.set_online(false), None);
    }

    #[test]
    fn test_is_online_tracks_last_signal() {
        let mut monitor = ConnectivityMonitor::new();
        monitor.set_online(true);
        assert!(monitor.is_online());
        monitor.set_online(false);
        assert!(!monitor.is_online());
    }
}
