//! Online/offline tracking
//!
//! [`ConnectivityMonitor`] holds the current reachability flag and fans each
//! transition out to registered listeners. Something outside the monitor has
//! to feed it signals; on devices that is usually a [`ReachabilityProbe`].

pub mod probe;

pub use probe::{HealthCheck, ProbeHandle, ReachabilityProbe};

use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Listener {
    id: u64,
    on_online: Callback,
    on_offline: Callback,
}

struct MonitorState {
    online: bool,
    next_id: u64,
    listeners: Vec<Listener>,
}

struct Inner {
    state: Mutex<MonitorState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared online/offline flag with transition listeners
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    online: initially_online,
                    next_id: 0,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Current reachability snapshot
    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }

    /// Feed a platform signal into the monitor
    ///
    /// Returns `true` if this was a transition. Listeners run synchronously,
    /// in registration order, once per transition. Repeating the current
    /// state is not a transition. Flapping is not debounced.
    pub fn set_online(&self, online: bool) -> bool {
        let callbacks: Vec<Callback> = {
            let mut state = self.inner.lock();
            if state.online == online {
                return false;
            }
            state.online = online;
            state
                .listeners
                .iter()
                .map(|l| if online { l.on_online.clone() } else { l.on_offline.clone() })
                .collect()
        };

        info!("Connectivity changed: {}", if online { "online" } else { "offline" });

        // Called outside the lock so a callback may register or tear down listeners
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Register transition callbacks
    ///
    /// The returned guard detaches exactly these callbacks when torn down or
    /// dropped.
    pub fn setup_network_listeners<F, G>(&self, on_online: F, on_offline: G) -> NetworkListeners
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push(Listener {
            id,
            on_online: Arc::new(on_online),
            on_offline: Arc::new(on_offline),
        });
        debug!("Registered network listener {}", id);

        NetworkListeners {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Registration guard returned by [`ConnectivityMonitor::setup_network_listeners`]
#[must_use = "dropping the guard detaches the listeners immediately"]
pub struct NetworkListeners {
    id: u64,
    monitor: Weak<Inner>,
}

impl NetworkListeners {
    /// Detach the callbacks registered with this guard
    pub fn teardown(self) {
        // Drop does the work
    }

    fn detach(&self) {
        if let Some(inner) = self.monitor.upgrade() {
            let mut state = inner.lock();
            state.listeners.retain(|l| l.id != self.id);
            debug!("Removed network listener {}", self.id);
        }
    }
}

impl Drop for NetworkListeners {
    fn drop(&mut self) {
        self.detach();
    }
}
