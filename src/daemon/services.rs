use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::launch::{DriverMeta, DriverSpec};
use super::runtime::{DriverInfo, DriverRuntime, Stopped};
use crate::clienv;
use crate::driver::PendingCalls;
use crate::error::{RpcError, SupervisorError};
use crate::protocol::{Message, Payload};

/// Caller part of the rpc calls the supervisor makes.
pub const DAEMON_CALLER: &str = "daemon";

/// A message a driver wrote, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Relayed {
    pub service: String,
    pub driver: String,
    pub message: Message,
}

/// Keeps one [`DriverRuntime`] per service.
///
/// Replies to the supervisor's own rpc calls are picked out of driver output
/// by [`poll`](Supervisor::poll); everything else is handed to the caller.
pub struct Supervisor {
    runtimes: Arc<RwLock<HashMap<String, DriverRuntime>>>,
    calls: PendingCalls,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            runtimes: Arc::default(),
            calls: PendingCalls::new(DAEMON_CALLER),
        }
    }
}

impl Supervisor {
    /// An empty supervisor, calling drivers as [`DAEMON_CALLER`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches a driver for `service` and sends it the handshake.
    pub async fn start(
        &self,
        service: &str,
        meta: DriverMeta,
        spec: DriverSpec,
        data: Value,
    ) -> Result<DriverInfo, SupervisorError> {
        let mut runtimes = self.runtimes.write().await;
        if let Some(existing) = runtimes.get_mut(service) {
            existing.try_exit()?;
            if existing.is_running() {
                return Err(SupervisorError::AlreadyRunning(service.to_string()));
            }
        }

        let runtime = DriverRuntime::launch(service, meta, spec, data)?;
        let info = runtime.info();
        info!(service, driver = %info.driver, pid = ?info.pid, "service started");
        runtimes.insert(service.to_string(), runtime);
        Ok(info)
    }

    /// Writes `message` to the stdin of the driver behind `service`.
    pub async fn send(&self, service: &str, message: &Message) -> Result<(), SupervisorError> {
        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes
            .get_mut(service)
            .ok_or_else(|| SupervisorError::UnknownDriver(service.to_string()))?;
        runtime.send_message(message)
    }

    /// Calls `method` on the driver behind `service` and waits for its reply.
    ///
    /// The reply only arrives while [`poll`](Self::poll) or
    /// [`relay`](Self::relay) runs. Calls are matched by id, so concurrent
    /// calls may complete in any order. A driver that exits without answering
    /// leaves the call waiting; use [`call_timeout`](Self::call_timeout) to
    /// bound it.
    pub async fn call(&self, service: &str, method: &str, payload: Payload) -> Result<Payload, SupervisorError> {
        let pending = self.calls.register(method);
        debug!(service, method, id = %pending.subject().correlation_id, "calling driver");
        self.send(service, &pending.message(payload)).await?;
        pending.wait().await.map_err(|source| SupervisorError::Rpc {
            service: service.to_string(),
            source,
        })
    }

    /// Like [`call`](Self::call), giving up after `timeout`.
    pub async fn call_timeout(
        &self,
        service: &str,
        method: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, SupervisorError> {
        tokio::time::timeout(timeout, self.call(service, method, payload))
            .await
            .map_err(|_| SupervisorError::Rpc {
                service: service.to_string(),
                source: RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                },
            })?
    }

    /// Calls made by the supervisor that still wait for a reply.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Stops the driver behind `service` and forgets it.
    pub async fn stop(&self, service: &str, timeout: Duration) -> Result<Stopped, SupervisorError> {
        // taken out of the map so a slow driver does not hold the lock
        let mut runtime = self
            .runtimes
            .write()
            .await
            .remove(service)
            .ok_or_else(|| SupervisorError::UnknownDriver(service.to_string()))?;

        info!(service, driver = %runtime.meta().name, "stopping service");
        let stopped = runtime.stop(timeout).await?;
        debug!(service, status = %stopped.status, "service stopped");
        Ok(stopped)
    }

    /// Stops every driver, one after the other. Failures are logged.
    pub async fn stop_all(&self, timeout: Duration) {
        let services: Vec<String> = {
            let runtimes = self.runtimes.read().await;
            runtimes.keys().cloned().collect()
        };

        for service in services {
            if let Err(e) = self.stop(&service, timeout).await {
                warn!(service = %service, error = %e, "failed to stop service");
            }
        }
    }

    /// Stops every driver with the configured grace period.
    pub async fn shutdown(&self) {
        self.stop_all(clienv::stop_timeout()).await;
    }

    /// Snapshot of every driver, sorted by service.
    pub async fn list(&self) -> Vec<DriverInfo> {
        let runtimes = self.runtimes.read().await;
        let mut list: Vec<_> = runtimes.values().map(DriverRuntime::info).collect();
        list.sort_by(|a, b| a.service.cmp(&b.service));
        list
    }

    /// Snapshot of one driver.
    pub async fn get(&self, service: &str) -> Option<DriverInfo> {
        let runtimes = self.runtimes.read().await;
        runtimes.get(service).map(DriverRuntime::info)
    }

    /// Drains every driver once. Each drain returns at once, so an idle
    /// driver never holds up the others.
    ///
    /// Replies to [`call`](Self::call) are resolved here and not returned.
    pub async fn poll(&self) -> Vec<Relayed> {
        let mut runtimes = self.runtimes.write().await;
        let mut relayed = Vec::new();
        for (service, runtime) in runtimes.iter_mut() {
            let driver = runtime.meta().name.clone();
            for message in runtime.fetch_messages() {
                if self.calls.accepts(&message) {
                    if let Err(err) = self.calls.resolve(message) {
                        warn!(service = %service, error = %err, "dropping rpc reply");
                    }
                    continue;
                }
                relayed.push(Relayed {
                    service: service.clone(),
                    driver: driver.clone(),
                    message,
                });
            }
        }
        relayed
    }

    /// Forwards driver output into `bus` until the receiver goes away.
    pub async fn relay(&self, bus: mpsc::Sender<Relayed>, interval: Duration) {
        info!(?interval, "relaying driver messages");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if bus.is_closed() {
                debug!("message bus closed, relay finished");
                return;
            }
            for relayed in self.poll().await {
                if bus.send(relayed).await.is_err() {
                    debug!("message bus closed, relay finished");
                    return;
                }
            }
        }
    }

    /// [`relay`](Self::relay) at the configured poll interval.
    pub async fn relay_default(&self, bus: mpsc::Sender<Relayed>) {
        self.relay(bus, clienv::poll_interval()).await;
    }

    /// Shared runtime map, for the health monitor.
    pub fn runtimes_ref(&self) -> Arc<RwLock<HashMap<String, DriverRuntime>>> {
        Arc::clone(&self.runtimes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn empty_supervisor() {
        let supervisor = Supervisor::new();
        assert!(supervisor.list().await.is_empty());
        assert!(supervisor.poll().await.is_empty());
        assert!(supervisor.get("engine").await.is_none());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_service_is_reported() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .send("engine", &Message::signal("command", "ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownDriver(name) if name == "engine"));
        assert!(supervisor.stop("engine", Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn call_to_unknown_service_leaves_no_pending_call() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .call("engine", "echo", Payload::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownDriver(_)));
        assert_eq!(supervisor.pending_calls(), 0);
    }

    #[tokio::test]
    async fn failed_launch_is_not_registered() {
        let supervisor = Supervisor::new();
        let err = supervisor
            .start(
                "engine",
                DriverMeta::new("engine-1"),
                DriverSpec::new("/nonexistent/driverlink-test-driver"),
                json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(supervisor.list().await.is_empty());
    }

    #[tokio::test]
    async fn relay_ends_when_bus_is_dropped() {
        let supervisor = Supervisor::new();
        let (bus, rx) = mpsc::channel(4);
        drop(rx);
        let outcome = tokio::time::timeout(Duration::from_secs(2), supervisor.relay_default(bus)).await;
        assert!(outcome.is_ok());
    }
}
