//! Health monitor: windowed evaluation of alarm and probe signals.
//!
//! Signals are kept per fleet together with the instant they arrived.
//! `evaluate` looks only at signals inside the requested window, so the
//! state machine can ask "anything bad since I shifted traffic?".

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use cutover_core::config::HealthSettings;
use cutover_core::{FleetId, HealthSignal, HealthVerdict};

/// Capacity of the alarm broadcast channel.
const ALARM_CHANNEL_CAPACITY: usize = 64;

/// A signal plus the instant it was received.
#[derive(Debug, Clone)]
struct Received {
    at: Instant,
    signal: HealthSignal,
}

/// Collects health signals and evaluates fleets over time windows.
///
/// Cheap to clone; clones share the same signal queues.
#[derive(Clone)]
pub struct HealthMonitor {
    /// Signal queues: fleet_id → signals in arrival order.
    signals: Arc<RwLock<HashMap<FleetId, VecDeque<Received>>>>,
    /// Minimum observations before a verdict other than inconclusive.
    min_signals: usize,
    /// Signals older than this are dropped on the next `record`.
    retention: Duration,
    /// Triggered signals are re-published here for early wake-ups.
    alarms: broadcast::Sender<HealthSignal>,
}

impl HealthMonitor {
    /// Create a monitor with explicit thresholds.
    pub fn new(min_signals: usize, retention: Duration) -> Self {
        let (alarms, _) = broadcast::channel(ALARM_CHANNEL_CAPACITY);
        Self {
            signals: Arc::new(RwLock::new(HashMap::new())),
            min_signals,
            retention,
            alarms,
        }
    }

    /// Create a monitor from resolved config.
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.min_signals, settings.signal_retention)
    }

    /// Record a signal for its fleet.
    pub async fn record(&self, signal: HealthSignal) {
        let now = Instant::now();
        {
            let mut signals = self.signals.write().await;
            let queue = signals.entry(signal.fleet_id.clone()).or_default();
            if let Some(cutoff) = now.checked_sub(self.retention) {
                while queue.front().is_some_and(|r| r.at < cutoff) {
                    queue.pop_front();
                }
            }
            queue.push_back(Received {
                at: now,
                signal: signal.clone(),
            });
        }

        if signal.triggered {
            warn!(
                fleet = %signal.fleet_id,
                source = %signal.source,
                "alarm signal received"
            );
            // No subscribers is fine: nobody is mid-cutover for this fleet.
            let _ = self.alarms.send(signal);
        } else {
            debug!(fleet = %signal.fleet_id, source = %signal.source, "health signal received");
        }
    }

    /// Evaluate a fleet over the `window` preceding now.
    ///
    /// Any triggered signal wins immediately. Otherwise the fleet is healthy
    /// only if at least `min_signals` signals were seen.
    pub async fn evaluate(&self, fleet_id: &str, window: Duration) -> HealthVerdict {
        let now = Instant::now();
        let cutoff = now.checked_sub(window);
        let signals = self.signals.read().await;

        let in_window = signals
            .get(fleet_id)
            .into_iter()
            .flatten()
            .filter(|r| cutoff.is_none_or(|c| r.at >= c));

        let mut observed = 0usize;
        for received in in_window {
            if received.signal.triggered {
                debug!(
                    fleet = %fleet_id,
                    source = %received.signal.source,
                    "unhealthy: triggered signal in window"
                );
                return HealthVerdict::Unhealthy;
            }
            observed += 1;
        }

        if observed < self.min_signals {
            debug!(
                fleet = %fleet_id,
                observed,
                required = self.min_signals,
                "inconclusive: not enough signals"
            );
            return HealthVerdict::Inconclusive;
        }

        HealthVerdict::Healthy
    }

    /// Subscribe to triggered signals for all fleets.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthSignal> {
        self.alarms.subscribe()
    }

    /// Number of retained signals for a fleet.
    pub async fn signal_count(&self, fleet_id: &str) -> usize {
        let signals = self.signals.read().await;
        signals.get(fleet_id).map_or(0, VecDeque::len)
    }

    /// Drop every retained signal for a fleet (e.g. after it is retired).
    pub async fn forget(&self, fleet_id: &str) {
        let mut signals = self.signals.write().await;
        signals.remove(fleet_id);
    }

    pub fn min_signals(&self) -> usize {
        self.min_signals
    }
}
