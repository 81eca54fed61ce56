//! Connectivity signal consumed by the facade and the sync loop.
//!
//! The engine never guesses at connectivity on its own: the integrator
//! (or the sync loop's reachability probe) feeds transitions into the
//! signal, and interested parties register callbacks to react — in
//! particular an offline→online flip kicks an immediate queue drain.
//! `NetworkStatus` is the stock implementation; embedders with their own
//! reachability source provide their own `ConnectivitySignal`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;

pub type ChangeCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Connectivity boundary the engine is built against.
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    /// Record the current connectivity. Returns true when this was a
    /// transition.
    fn set_online(&self, online: bool) -> bool;

    /// Register a callback fired on every actual transition with the new
    /// state. Not fired for redundant sets.
    fn on_change(&self, callback: ChangeCallback);
}

/// Shared online/offline flag with change notifications.
pub struct NetworkStatus {
    online: AtomicBool,
    callbacks: Mutex<Vec<ChangeCallback>>,
}

impl NetworkStatus {
    pub fn new(initially_online: bool) -> Self {
        NetworkStatus {
            online: AtomicBool::new(initially_online),
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectivitySignal for NetworkStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }
        info!(online, "Connectivity changed");
        if let Ok(cbs) = self.callbacks.lock() {
            for cb in cbs.iter() {
                cb(online);
            }
        }
        true
    }

    fn on_change(&self, callback: ChangeCallback) {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.push(callback);
        }
    }
}
