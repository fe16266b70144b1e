//! Shared types used across Cutover crates.
//!
//! Fleets, deployments, traffic steps and health signals. Everything here
//! is JSON-serializable so the state store and the REST API can share it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a fleet.
pub type FleetId = String;

/// Unique identifier for a deployment (one cutover attempt).
pub type DeploymentId = String;

// ── Fleet ─────────────────────────────────────────────────────────

/// Role of a fleet within its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetRole {
    /// The stable fleet currently serving production traffic.
    Blue,
    /// The candidate fleet (or a demoted former blue awaiting retirement).
    Green,
}

/// Health status of a fleet as last recorded by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// A named set of service instances behind one target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: FleetId,
    /// Service this fleet belongs to. Role and weight invariants hold per service.
    pub service: String,
    pub role: FleetRole,
    /// Share of the service's traffic routed to this fleet (0-100).
    pub weight: u8,
    pub health: HealthStatus,
    /// Immutable image reference (commit SHA, build id, ...). Recorded only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    /// Address (`host:port`) used by synthetic health probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_address: Option<String>,
    /// Unix timestamp (seconds) when the fleet was registered.
    pub created_at: u64,
}

// ── Routing strategy ──────────────────────────────────────────────

/// How traffic moves from the blue fleet to the green fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Shift `percentage` to green, hold for `bake_minutes`, then shift the rest.
    Canary { percentage: u8, bake_minutes: u64 },
    /// Shift `step_percentage` every `interval_minutes` until green takes 100.
    Linear {
        step_percentage: u8,
        interval_minutes: u64,
    },
    /// Shift everything at once.
    AllAtOnce,
}

impl RoutingStrategy {
    /// Short label used in logs and the audit trail.
    pub fn label(&self) -> &'static str {
        match self {
            RoutingStrategy::Canary { .. } => "canary",
            RoutingStrategy::Linear { .. } => "linear",
            RoutingStrategy::AllAtOnce => "all_at_once",
        }
    }
}

/// One scheduled traffic shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStep {
    /// Position in the schedule (0-based).
    pub index: usize,
    /// Weight the green fleet receives after this step.
    pub target: u8,
    /// Offset from deployment start, in seconds.
    pub offset_secs: u64,
    /// How long to hold after this step before evaluating health, in seconds.
    pub hold_secs: u64,
}

impl TrafficStep {
    pub fn offset(&self) -> Duration {
        Duration::from_secs(self.offset_secs)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Succeeded | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

/// A fleet retirement scheduled after a successful cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRetirement {
    pub fleet_id: FleetId,
    /// Unix timestamp (seconds) after which the fleet is retired.
    pub due_at: u64,
}

/// A rollback that was decided but not yet carried out. Persisted before
/// traffic is reverted so a restart finishes it instead of moving forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRollback {
    pub reason: String,
    /// Set when the green fleet failed its health evaluation.
    #[serde(default)]
    pub mark_unhealthy: bool,
}

/// One cutover attempt from a blue fleet to a green fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub service: String,
    pub blue_fleet: FleetId,
    pub green_fleet: FleetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    pub strategy: RoutingStrategy,
    /// Ordered schedule derived from `strategy`.
    pub steps: Vec<TrafficStep>,
    /// Number of steps already applied.
    pub phase_index: usize,
    pub status: DeploymentStatus,
    /// Why the deployment ended the way it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub ended_at: Option<u64>,
    /// Unix timestamp of the most recently applied step.
    #[serde(default)]
    pub step_applied_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_retirement: Option<PendingRetirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_rollback: Option<PendingRollback>,
}

impl Deployment {
    /// The step that was applied most recently, if any.
    pub fn current_step(&self) -> Option<&TrafficStep> {
        self.phase_index
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
    }

    /// Whether every step of the schedule has been applied.
    pub fn all_steps_applied(&self) -> bool {
        self.phase_index >= self.steps.len()
    }
}

// ── Health ────────────────────────────────────────────────────────

/// A point-in-time evaluation result from an alarm or synthetic check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    /// Alarm id, or `synthetic:http` for probe results.
    pub source: String,
    pub fleet_id: FleetId,
    pub triggered: bool,
    /// Unix timestamp in milliseconds.
    #[serde(default = "epoch_millis")]
    pub timestamp: u64,
}

/// Outcome of evaluating the signals for a fleet over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
    /// Not enough signals yet. Never treated as safe.
    Inconclusive,
}

// ── Audit ─────────────────────────────────────────────────────────

/// What an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    FleetRegistered,
    WeightChanged,
    HealthChanged,
    FleetPromoted,
    FleetRetired,
    DeploymentCreated,
    DeploymentStarted,
    DeploymentResumed,
    StepApplied,
    HealthEvaluated,
    AlarmReceived,
    AbortRequested,
    RolledBack,
    Succeeded,
    Failed,
}

/// One entry in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    /// Unix timestamp in milliseconds.
    pub at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<FleetId>,
    pub kind: AuditKind,
    pub detail: String,
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_serializes_with_type_tag() {
        let s = RoutingStrategy::Canary {
            percentage: 10,
            bake_minutes: 5,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "canary");
        assert_eq!(json["percentage"], 10);

        let all: RoutingStrategy = serde_json::from_str(r#"{"type":"all_at_once"}"#).unwrap();
        assert_eq!(all, RoutingStrategy::AllAtOnce);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::InProgress.is_terminal());
        assert!(DeploymentStatus::Succeeded.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::RolledBack.is_terminal());
    }

    #[test]
    fn signal_timestamp_defaults_to_now() {
        let sig: HealthSignal =
            serde_json::from_str(r#"{"source":"alarm-5xx","fleet_id":"green","triggered":true}"#)
                .unwrap();
        assert!(sig.timestamp > 0);
        assert!(sig.triggered);
    }

    #[test]
    fn current_step_tracks_cursor() {
        let mut d = Deployment {
            id: "d1".to_string(),
            service: "api".to_string(),
            blue_fleet: "blue".to_string(),
            green_fleet: "green".to_string(),
            image_tag: None,
            strategy: RoutingStrategy::AllAtOnce,
            steps: vec![TrafficStep {
                index: 0,
                target: 100,
                offset_secs: 0,
                hold_secs: 0,
            }],
            phase_index: 0,
            status: DeploymentStatus::Pending,
            reason: None,
            created_at: 1000,
            started_at: None,
            ended_at: None,
            step_applied_at: None,
            pending_retirement: None,
            pending_rollback: None,
        };
        assert!(d.current_step().is_none());
        assert!(!d.all_steps_applied());

        d.phase_index = 1;
        assert_eq!(d.current_step().unwrap().target, 100);
        assert!(d.all_steps_applied());
    }
}
