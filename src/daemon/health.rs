use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::runtime::DriverRuntime;
use super::services::Supervisor;
use crate::protocol::DriverState;

/// Default health check interval
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Watches supervised drivers and records the ones that exited.
///
/// Exited drivers are only marked; restarting them is up to whoever
/// supervises the daemon.
pub struct HealthMonitor {
    runtimes: Arc<RwLock<HashMap<String, DriverRuntime>>>,
    check_interval: Duration,
}

impl HealthMonitor {
    /// Watches the drivers of `supervisor`, sharing its runtime map.
    pub fn new(supervisor: &Supervisor) -> Self {
        Self {
            runtimes: supervisor.runtimes_ref(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Runs the check loop. Meant to be spawned as a background task.
    pub async fn run(&self) {
        info!(interval = ?self.check_interval, "health monitor started");

        let mut interval = tokio::time::interval(self.check_interval);
        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Checks every running driver once and returns those that exited since
    /// the last check.
    pub async fn check_all(&self) -> Vec<(String, ExitStatus)> {
        let mut runtimes = self.runtimes.write().await;
        let mut exited = Vec::new();

        for (service, runtime) in runtimes.iter_mut().filter(|(_, r)| r.is_running()) {
            match runtime.try_exit() {
                Ok(Some(status)) => {
                    if runtime.last_state() == Some(DriverState::Exit) {
                        info!(service = %service, %status, "driver exited after stop");
                    } else {
                        warn!(service = %service, %status, "driver exited unexpectedly");
                    }
                    exited.push((service.clone(), status));
                }
                Ok(None) => debug!(service = %service, pid = ?runtime.pid(), "driver is running"),
                Err(e) => warn!(service = %service, error = %e, "unable to check driver"),
            }
        }
        exited
    }

    pub async fn status(&self) -> HealthStatus {
        HealthStatus::from_runtimes(&self.runtimes).await
    }
}

/// Health status summary
#[derive(Debug, Clone, Default)]
pub struct HealthStatus {
    pub total: usize,
    pub running: usize,
    pub exited: usize,
    /// Drivers that exited with a failure status or without being told to stop
    pub unhealthy: Vec<String>,
}

impl HealthStatus {
    pub async fn from_runtimes(runtimes: &Arc<RwLock<HashMap<String, DriverRuntime>>>) -> Self {
        let runtimes = runtimes.read().await;
        let mut status = HealthStatus {
            total: runtimes.len(),
            ..Self::default()
        };

        for (service, runtime) in runtimes.iter() {
            if runtime.is_running() {
                status.running += 1;
                continue;
            }
            if let Some(exit) = runtime.exit_status() {
                status.exited += 1;
                if !exit.success() || runtime.last_state() != Some(DriverState::Exit) {
                    status.unhealthy.push(service.clone());
                }
            }
        }
        status.unhealthy.sort();
        status
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }
}
