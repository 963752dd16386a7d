//! Periodic reachability checks feeding a [`ConnectivityMonitor`]

use super::ConnectivityMonitor;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest period between two checks
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// A cheap "can we reach the backend right now" check
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

pub struct ReachabilityProbe {
    monitor: ConnectivityMonitor,
    check: Arc<dyn HealthCheck>,
    interval: Duration,
}

impl ReachabilityProbe {
    pub fn new(monitor: ConnectivityMonitor, check: Arc<dyn HealthCheck>, interval: Duration) -> Self {
        if interval < MIN_PROBE_INTERVAL {
            warn!("Probe interval {:?} is too short, using {:?}", interval, MIN_PROBE_INTERVAL);
        }
        Self {
            monitor,
            check,
            interval: interval.max(MIN_PROBE_INTERVAL),
        }
    }

    /// Start probing; the first check runs immediately
    pub fn spawn(self) -> ProbeHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let reachable = self.check.is_reachable().await;
                debug!("Reachability probe: {}", reachable);
                self.monitor.set_online(reachable);
            }
        });

        ProbeHandle { task: Some(task) }
    }
}

/// Stops the probe when dropped
pub struct ProbeHandle {
    task: Option<JoinHandle<()>>,
}

impl ProbeHandle {
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
