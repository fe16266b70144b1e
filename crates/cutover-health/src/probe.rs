//! Synthetic HTTP checks.
//!
//! Alarms are the primary health source, but a green fleet with a probe
//! address also gets a background task that probes its health endpoint on
//! an interval and feeds the result into the `HealthMonitor` as a
//! `synthetic:http` signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cutover_core::config::HealthSettings;
use cutover_core::{epoch_millis, FleetId, HealthSignal};

use crate::monitor::HealthMonitor;

/// Signal source recorded for synthetic probe results.
pub const SYNTHETIC_SOURCE: &str = "synthetic:http";

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "cutover-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

/// Per-fleet probe task.
struct ProbeSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs synthetic probes for fleets and records the results.
#[derive(Clone)]
pub struct SyntheticChecks {
    monitor: HealthMonitor,
    path: String,
    interval: Duration,
    timeout: Duration,
    /// Active probes: fleet_id → slot.
    probes: Arc<RwLock<HashMap<FleetId, ProbeSlot>>>,
}

impl SyntheticChecks {
    pub fn new(monitor: HealthMonitor, path: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            monitor,
            path: path.to_string(),
            interval,
            timeout,
            probes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_settings(monitor: HealthMonitor, settings: &HealthSettings) -> Self {
        Self::new(
            monitor,
            &settings.probe_path,
            settings.probe_interval,
            settings.probe_timeout,
        )
    }

    /// Start probing a fleet. Replaces any probe already running for it.
    pub async fn start(&self, fleet_id: &str, address: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_probe_loop(
            fleet_id.to_string(),
            address.to_string(),
            self.path.clone(),
            self.interval,
            self.timeout,
            self.monitor.clone(),
            shutdown_rx,
        ));

        let mut probes = self.probes.write().await;
        if let Some(old) = probes.insert(
            fleet_id.to_string(),
            ProbeSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(fleet = %fleet_id, %address, path = %self.path, "synthetic probe started");
    }

    /// Stop probing a fleet.
    pub async fn stop(&self, fleet_id: &str) {
        let mut probes = self.probes.write().await;
        if let Some(slot) = probes.remove(fleet_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(fleet = %fleet_id, "synthetic probe stopped");
        }
    }

    /// Stop all probes (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut probes = self.probes.write().await;
        for (id, slot) in probes.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(fleet = %id, "synthetic probe stopped");
        }
    }

    /// Fleet ids with an active probe.
    pub async fn active(&self) -> Vec<FleetId> {
        let probes = self.probes.read().await;
        probes.keys().cloned().collect()
    }

    pub async fn is_probing(&self, fleet_id: &str) -> bool {
        let probes = self.probes.read().await;
        probes.contains_key(fleet_id)
    }
}

/// The probe loop for a single fleet.
async fn run_probe_loop(
    fleet_id: FleetId,
    address: String,
    path: String,
    interval: Duration,
    timeout: Duration,
    monitor: HealthMonitor,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(fleet = %fleet_id, %address, "probe loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let result = http_probe(&address, &path, timeout).await;
                monitor
                    .record(HealthSignal {
                        source: SYNTHETIC_SOURCE.to_string(),
                        fleet_id: fleet_id.clone(),
                        triggered: result != ProbeResult::Healthy,
                        timestamp: epoch_millis(),
                    })
                    .await;
            }
            _ = shutdown.changed() => {
                debug!(fleet = %fleet_id, "probe loop shutting down");
                break;
            }
        }
    }
}
