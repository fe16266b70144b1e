//! Cutover state machine.
//!
//! Each started deployment runs as one tokio task that walks the traffic
//! schedule: apply a step, persist the cursor, hold, evaluate the green
//! fleet, and either move on, finish, or roll back.
//!
//! ```text
//! Pending ──start──▶ InProgress ──all steps healthy──▶ Succeeded
//!    │                   │
//!    │ abort             ├──unhealthy / abort──▶ RolledBack
//!    ▼                   │
//! RolledBack             └──collaborator error──▶ Failed
//! ```
//!
//! Waits are a `tokio::select!` over the hold timer, the abort watch
//! channel and the monitor's alarm broadcast, so a triggered alarm for the
//! green fleet ends a bake early.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cutover_core::config::{ControllerSettings, HealthSettings};
use cutover_core::{
    epoch_millis, epoch_secs, AuditEvent, AuditKind, Deployment, DeploymentId, DeploymentStatus,
    Fleet, FleetId, FleetRole, HealthSignal, HealthStatus, HealthVerdict, PendingRetirement,
    PendingRollback, RoutingStrategy, TrafficStep,
};
use cutover_health::{HealthMonitor, SyntheticChecks};
use cutover_state::audit::Entry;
use cutover_state::{AuditLog, StateStore};

use crate::error::{CutoverError, CutoverResult, RegistryError};
use crate::lifecycle::{FleetLifecycle, LoggingLifecycle};
use crate::registry::{FleetRegistry, NewFleet};
use crate::shifter::TrafficShifter;
use crate::strategy::compute_schedule;
use crate::traffic::{TrafficRouter, WeightTable};

/// Request to create a deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeployment {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<DeploymentId>,
    pub blue_fleet: FleetId,
    pub green_fleet: FleetId,
    pub strategy: RoutingStrategy,
    #[serde(default)]
    pub image_tag: Option<String>,
}

/// A deployment task owned by this process.
struct ActiveCutover {
    abort_tx: watch::Sender<Option<String>>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: StateStore,
    audit: AuditLog,
    registry: FleetRegistry,
    shifter: TrafficShifter,
    health: HealthMonitor,
    probes: SyntheticChecks,
    lifecycle: Arc<dyn FleetLifecycle>,
    settings: ControllerSettings,
    health_settings: HealthSettings,
    /// Running deployments: deployment_id → task. Also serializes
    /// create/start/abort.
    active: Mutex<HashMap<DeploymentId, ActiveCutover>>,
    /// Scheduled retirements: deployment_id → timer task.
    retirements: StdMutex<HashMap<DeploymentId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

/// Drives blue/green cutovers. Cheap to clone.
#[derive(Clone)]
pub struct CutoverController {
    inner: Arc<Inner>,
}

/// Builder for `CutoverController`.
pub struct ControllerBuilder {
    store: StateStore,
    router: Option<Arc<dyn TrafficRouter>>,
    lifecycle: Option<Arc<dyn FleetLifecycle>>,
    settings: ControllerSettings,
    health_settings: HealthSettings,
}

impl ControllerBuilder {
    pub fn router(mut self, router: Arc<dyn TrafficRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn FleetLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn health_settings(mut self, settings: HealthSettings) -> Self {
        self.health_settings = settings;
        self
    }

    pub fn build(self) -> CutoverResult<CutoverController> {
        let audit = AuditLog::open(self.store.clone())?;
        let registry = FleetRegistry::open(self.store.clone(), audit.clone())?;
        let router = self
            .router
            .unwrap_or_else(|| Arc::new(WeightTable::new()) as Arc<dyn TrafficRouter>);
        let lifecycle = self
            .lifecycle
            .unwrap_or_else(|| Arc::new(LoggingLifecycle) as Arc<dyn FleetLifecycle>);
        let health = HealthMonitor::from_settings(&self.health_settings);
        let probes = SyntheticChecks::from_settings(health.clone(), &self.health_settings);

        Ok(CutoverController {
            inner: Arc::new(Inner {
                shifter: TrafficShifter::new(registry.clone(), router),
                store: self.store,
                audit,
                registry,
                health,
                probes,
                lifecycle,
                settings: self.settings,
                health_settings: self.health_settings,
                active: Mutex::new(HashMap::new()),
                retirements: StdMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

/// What ended a hold.
enum Observation {
    Proceed,
    Unhealthy,
    Aborted(String),
}

enum Rollback {
    Unhealthy { step: usize, target: u8 },
    Aborted(String),
}

impl CutoverController {
    pub fn builder(store: StateStore) -> ControllerBuilder {
        ControllerBuilder {
            store,
            router: None,
            lifecycle: None,
            settings: ControllerSettings::default(),
            health_settings: HealthSettings::default(),
        }
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.inner.registry
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    // ── Fleets ─────────────────────────────────────────────────────

    pub fn register_fleet(&self, new: NewFleet) -> CutoverResult<Fleet> {
        if new.id.trim().is_empty() || new.service.trim().is_empty() {
            return Err(CutoverError::Validation(
                "fleet id and service must not be empty".to_string(),
            ));
        }
        Ok(self.inner.registry.register(new)?)
    }

    /// Retire a fleet that receives no traffic and is not part of a
    /// pending or running deployment.
    pub async fn retire_fleet(&self, fleet_id: &str) -> CutoverResult<Fleet> {
        if let Some(deployment) = self.active_deployment_for(fleet_id)? {
            return Err(CutoverError::FleetBusy {
                fleet: fleet_id.to_string(),
                deployment,
            });
        }
        let fleet = self.inner.registry.retire(fleet_id)?;
        self.inner.probes.stop(fleet_id).await;
        self.inner.health.forget(fleet_id).await;
        self.inner
            .lifecycle
            .retire(&fleet)
            .await
            .map_err(|e| CutoverError::Lifecycle(format!("{e:#}")))?;
        Ok(fleet)
    }

    /// Feed a pushed alarm or check result into the health monitor.
    pub async fn record_signal(&self, signal: HealthSignal) -> CutoverResult<()> {
        self.inner.registry.get(&signal.fleet_id)?;
        if signal.triggered {
            self.inner.audit.record(
                Entry::new(AuditKind::AlarmReceived, format!("source={}", signal.source))
                    .fleet(&signal.fleet_id),
            );
        }
        self.inner.health.record(signal).await;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Validate a deployment request and persist it as `Pending`.
    pub async fn create(&self, new: NewDeployment) -> CutoverResult<Deployment> {
        let steps = compute_schedule(&new.strategy)?;

        if new.blue_fleet == new.green_fleet {
            return Err(CutoverError::Validation(
                "blue and green fleet must differ".to_string(),
            ));
        }
        let blue = self.inner.registry.get(&new.blue_fleet)?;
        let green = self.inner.registry.get(&new.green_fleet)?;
        if blue.role != FleetRole::Blue {
            return Err(CutoverError::Validation(format!(
                "fleet {} is not the blue fleet of service {}",
                blue.id, blue.service
            )));
        }
        if green.role != FleetRole::Green {
            return Err(CutoverError::Validation(format!(
                "fleet {} is not the green fleet of service {}",
                green.id, green.service
            )));
        }
        if blue.service != green.service {
            return Err(CutoverError::Validation(format!(
                "fleets belong to different services: {} and {}",
                blue.service, green.service
            )));
        }

        let id = match new.id {
            Some(id) if id.trim().is_empty() => {
                return Err(CutoverError::Validation(
                    "deployment id must not be empty".to_string(),
                ));
            }
            Some(id) => id,
            None => format!(
                "{}-{}-{}",
                blue.service,
                epoch_millis(),
                self.inner.next_id.fetch_add(1, Ordering::SeqCst)
            ),
        };

        let _active = self.inner.active.lock().await;
        if self.inner.store.get_deployment(&id)?.is_some() {
            return Err(CutoverError::DeploymentExists(id));
        }
        for fleet in [&blue.id, &green.id] {
            if let Some(deployment) = self.active_deployment_for(fleet)? {
                return Err(CutoverError::FleetBusy {
                    fleet: fleet.clone(),
                    deployment,
                });
            }
        }

        let deployment = Deployment {
            id,
            service: blue.service.clone(),
            blue_fleet: blue.id,
            green_fleet: green.id,
            image_tag: new.image_tag.or(green.image_tag),
            strategy: new.strategy,
            steps,
            phase_index: 0,
            status: DeploymentStatus::Pending,
            reason: None,
            created_at: epoch_secs(),
            started_at: None,
            ended_at: None,
            step_applied_at: None,
            pending_retirement: None,
            pending_rollback: None,
        };
        self.inner.store.put_deployment(&deployment)?;

        info!(
            deployment = %deployment.id,
            service = %deployment.service,
            strategy = deployment.strategy.label(),
            steps = deployment.steps.len(),
            "deployment created"
        );
        self.inner.audit.record(
            Entry::new(
                AuditKind::DeploymentCreated,
                format!(
                    "{} -> {} strategy={} steps={}",
                    deployment.blue_fleet,
                    deployment.green_fleet,
                    deployment.strategy.label(),
                    deployment.steps.len()
                ),
            )
            .deployment(&deployment.id),
        );
        Ok(deployment)
    }

    /// Start a pending deployment.
    pub async fn start(&self, id: &str) -> CutoverResult<Deployment> {
        let mut active = self.inner.active.lock().await;
        let mut deployment = self.load(id)?;
        match deployment.status {
            DeploymentStatus::Pending => {}
            DeploymentStatus::InProgress => return Err(CutoverError::AlreadyStarted(id.to_string())),
            _ => return Err(CutoverError::AlreadyTerminal(id.to_string())),
        }

        let blue = self.inner.registry.get(&deployment.blue_fleet)?;
        let green = self.inner.registry.get(&deployment.green_fleet)?;
        if blue.weight != 100 {
            return Err(CutoverError::Validation(format!(
                "blue fleet {} has weight {}, expected 100",
                blue.id, blue.weight
            )));
        }

        deployment.status = DeploymentStatus::InProgress;
        deployment.started_at = Some(epoch_secs());
        self.inner.store.put_deployment(&deployment)?;

        info!(deployment = %id, strategy = deployment.strategy.label(), "deployment started");
        self.inner.audit.record(
            Entry::new(AuditKind::DeploymentStarted, deployment.strategy.label()).deployment(id),
        );

        if let Some(address) = &green.probe_address {
            self.inner.probes.start(&green.id, address).await;
        }
        let slot = self.spawn_cutover(id.to_string(), None);
        active.insert(id.to_string(), slot);
        Ok(deployment)
    }

    /// Abort a deployment.
    ///
    /// A pending deployment is rolled back immediately. A running one is
    /// rolled back at the next step boundary or hold; an in-flight shift is
    /// allowed to finish first.
    pub async fn abort(&self, id: &str, reason: &str) -> CutoverResult<Deployment> {
        let active = self.inner.active.lock().await;
        let mut deployment = self.load(id)?;
        if deployment.status.is_terminal() {
            return Err(CutoverError::AlreadyTerminal(id.to_string()));
        }

        self.inner.audit.record(
            Entry::new(AuditKind::AbortRequested, reason).deployment(id),
        );

        if deployment.status == DeploymentStatus::Pending {
            deployment.status = DeploymentStatus::RolledBack;
            deployment.reason = Some(format!("aborted: {reason}"));
            deployment.ended_at = Some(epoch_secs());
            self.inner.store.put_deployment(&deployment)?;
            info!(deployment = %id, %reason, "pending deployment aborted");
            self.inner.audit.record(
                Entry::new(AuditKind::RolledBack, format!("aborted before start: {reason}"))
                    .deployment(id),
            );
            return Ok(deployment);
        }

        let slot = active
            .get(id)
            .ok_or_else(|| CutoverError::NotRunning(id.to_string()))?;
        slot.abort_tx.send_replace(Some(reason.to_string()));
        info!(deployment = %id, %reason, "abort queued");
        Ok(deployment)
    }

    pub fn get(&self, id: &str) -> CutoverResult<Deployment> {
        self.load(id)
    }

    /// All deployments, oldest first.
    pub fn list(&self) -> CutoverResult<Vec<Deployment>> {
        let mut deployments = self.inner.store.list_deployments()?;
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(deployments)
    }

    /// Audit events for one deployment.
    pub fn events(&self, id: &str) -> CutoverResult<Vec<AuditEvent>> {
        self.load(id)?;
        Ok(self.inner.audit.list_for_deployment(id)?)
    }

    /// The complete audit log.
    pub fn all_events(&self) -> CutoverResult<Vec<AuditEvent>> {
        Ok(self.inner.audit.list()?)
    }

    /// Wait for a running deployment's task to finish, then return it.
    pub async fn join(&self, id: &str) -> CutoverResult<Deployment> {
        let handle = {
            let mut active = self.inner.active.lock().await;
            active.get_mut(id).and_then(|slot| slot.handle.take())
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(deployment = %id, error = %e, "cutover task ended abnormally");
            }
        }
        self.load(id)
    }

    /// Pick up work persisted by a previous process.
    ///
    /// Every `InProgress` deployment continues from its cursor; steps that
    /// were already applied are not applied again. Retirements that were
    /// scheduled but not carried out are rescheduled for the time left.
    /// Returns the number of deployments resumed.
    pub async fn resume(&self) -> CutoverResult<usize> {
        let mut resumed = 0;
        for deployment in self.inner.store.list_deployments()? {
            match deployment.status {
                DeploymentStatus::InProgress => {
                    let mut active = self.inner.active.lock().await;
                    if active.contains_key(&deployment.id) {
                        continue;
                    }

                    let hold = remaining_hold(&deployment);
                    info!(
                        deployment = %deployment.id,
                        phase = deployment.phase_index,
                        steps = deployment.steps.len(),
                        "resuming deployment"
                    );
                    self.inner.audit.record(
                        Entry::new(
                            AuditKind::DeploymentResumed,
                            format!(
                                "at step {}/{}",
                                deployment.phase_index,
                                deployment.steps.len()
                            ),
                        )
                        .deployment(&deployment.id),
                    );

                    if let Ok(green) = self.inner.registry.get(&deployment.green_fleet) {
                        if let Some(address) = &green.probe_address {
                            self.inner.probes.start(&green.id, address).await;
                        }
                    }
                    let slot = self.spawn_cutover(deployment.id.clone(), hold);
                    active.insert(deployment.id.clone(), slot);
                    resumed += 1;
                }
                DeploymentStatus::Succeeded => {
                    if let Some(pending) = &deployment.pending_retirement {
                        let delay = Duration::from_secs(pending.due_at.saturating_sub(epoch_secs()));
                        self.schedule_retirement(&deployment.id, &pending.fleet_id, delay);
                    }
                }
                _ => {}
            }
        }
        Ok(resumed)
    }

    /// Stop background work. Running deployments stay `InProgress` and are
    /// picked up by `resume` on the next start.
    pub async fn shutdown(&self) {
        self.inner.probes.stop_all().await;
        let mut active = self.inner.active.lock().await;
        for (id, slot) in active.drain() {
            if let Some(handle) = slot.handle {
                handle.abort();
            }
            debug!(deployment = %id, "cutover task stopped");
        }
        drop(active);

        let mut retirements = self.retirements();
        for (id, handle) in retirements.drain() {
            handle.abort();
            debug!(deployment = %id, "retirement timer stopped");
        }
        info!("cutover controller stopped");
    }

    // ── Internals ──────────────────────────────────────────────────

    fn load(&self, id: &str) -> CutoverResult<Deployment> {
        self.inner
            .store
            .get_deployment(id)?
            .ok_or_else(|| CutoverError::DeploymentNotFound(id.to_string()))
    }

    fn retirements(&self) -> std::sync::MutexGuard<'_, HashMap<DeploymentId, JoinHandle<()>>> {
        self.inner
            .retirements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A pending or running deployment that references the fleet.
    fn active_deployment_for(&self, fleet_id: &str) -> CutoverResult<Option<DeploymentId>> {
        Ok(self
            .inner
            .store
            .list_deployments()?
            .into_iter()
            .find(|d| {
                !d.status.is_terminal() && (d.blue_fleet == fleet_id || d.green_fleet == fleet_id)
            })
            .map(|d| d.id))
    }

    fn spawn_cutover(&self, id: DeploymentId, resumed_hold: Option<Duration>) -> ActiveCutover {
        let (abort_tx, abort_rx) = watch::channel(None);
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            controller.drive(id, abort_rx, resumed_hold).await;
        });
        ActiveCutover {
            abort_tx,
            handle: Some(handle),
        }
    }

    async fn drive(
        &self,
        id: DeploymentId,
        mut abort_rx: watch::Receiver<Option<String>>,
        resumed_hold: Option<Duration>,
    ) {
        if let Err(e) = self.run_cutover(&id, &mut abort_rx, resumed_hold).await {
            self.fail(&id, &e);
        }

        if let Ok(deployment) = self.load(&id) {
            self.inner.probes.stop(&deployment.green_fleet).await;
        }
        self.inner.active.lock().await.remove(&id);
        debug!(deployment = %id, "cutover task finished");
    }

    async fn run_cutover(
        &self,
        id: &str,
        abort_rx: &mut watch::Receiver<Option<String>>,
        mut resumed_hold: Option<Duration>,
    ) -> CutoverResult<()> {
        let mut alarms = self.inner.health.subscribe();
        let mut deployment = self.load(id)?;
        if deployment.pending_rollback.is_some() {
            info!(deployment = %id, "finishing interrupted rollback");
            return self.finish_rollback(deployment).await;
        }
        if deployment.all_steps_applied() {
            let green = self.inner.registry.get(&deployment.green_fleet)?;
            if green.role == FleetRole::Blue {
                return self.complete(deployment).await;
            }
        }
        let mut since = Instant::now();

        loop {
            if let Some(step) = deployment.current_step().cloned() {
                let hold = resumed_hold.take().unwrap_or_else(|| step.hold());
                match self
                    .observe(&deployment, &step, hold, since, abort_rx, &mut alarms)
                    .await?
                {
                    Observation::Proceed => {}
                    Observation::Unhealthy => {
                        let cause = Rollback::Unhealthy {
                            step: step.index,
                            target: step.target,
                        };
                        return self.roll_back(deployment, cause).await;
                    }
                    Observation::Aborted(reason) => {
                        return self.roll_back(deployment, Rollback::Aborted(reason)).await;
                    }
                }
            }

            let queued = abort_rx.borrow().clone();
            if let Some(reason) = queued {
                return self.roll_back(deployment, Rollback::Aborted(reason)).await;
            }

            if deployment.all_steps_applied() {
                return self.complete(deployment).await;
            }

            let step = deployment.steps[deployment.phase_index].clone();
            since = Instant::now();
            self.inner
                .shifter
                .apply_step(
                    &deployment.id,
                    &deployment.blue_fleet,
                    &deployment.green_fleet,
                    step.target,
                )
                .await?;

            deployment.phase_index += 1;
            deployment.step_applied_at = Some(epoch_secs());
            self.inner.store.put_deployment(&deployment)?;
            info!(
                deployment = %id,
                step = step.index + 1,
                of = deployment.steps.len(),
                target = step.target,
                "step applied"
            );
            self.inner.audit.record(
                Entry::new(
                    AuditKind::StepApplied,
                    format!(
                        "step {}/{}: green {}%",
                        step.index + 1,
                        deployment.steps.len(),
                        step.target
                    ),
                )
                .deployment(id)
                .fleet(&deployment.green_fleet),
            );
        }
    }

    /// Hold after a step, then decide whether it is safe to continue.
    async fn observe(
        &self,
        deployment: &Deployment,
        step: &TrafficStep,
        hold: Duration,
        since: Instant,
        abort_rx: &mut watch::Receiver<Option<String>>,
        alarms: &mut broadcast::Receiver<HealthSignal>,
    ) -> CutoverResult<Observation> {
        let green = deployment.green_fleet.as_str();
        let health = &self.inner.health;
        debug!(deployment = %deployment.id, step = step.index + 1, ?hold, "holding");

        let deadline = Instant::now() + hold;
        loop {
            // A queued abort or alarm wins over an expired (or zero) hold.
            tokio::select! {
                biased;
                reason = abort_requested(abort_rx) => return Ok(Observation::Aborted(reason)),
                _ = next_alarm(alarms, green) => {
                    if health.evaluate(green, since.elapsed()).await == HealthVerdict::Unhealthy {
                        self.audit_verdict(deployment, step, HealthVerdict::Unhealthy, "alarm during hold");
                        return Ok(Observation::Unhealthy);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let give_up_at = Instant::now() + self.inner.health_settings.max_inconclusive_wait;
        loop {
            let verdict = health.evaluate(green, since.elapsed()).await;
            match verdict {
                HealthVerdict::Healthy => {
                    self.inner.registry.set_health(green, HealthStatus::Healthy)?;
                    self.audit_verdict(deployment, step, verdict, "hold elapsed");
                    return Ok(Observation::Proceed);
                }
                HealthVerdict::Unhealthy => {
                    self.audit_verdict(deployment, step, verdict, "hold elapsed");
                    return Ok(Observation::Unhealthy);
                }
                HealthVerdict::Inconclusive => {
                    let now = Instant::now();
                    if now >= give_up_at {
                        warn!(
                            deployment = %deployment.id,
                            fleet = %green,
                            "no verdict within the inconclusive limit, proceeding"
                        );
                        self.audit_verdict(deployment, step, verdict, "wait limit reached, proceeding");
                        return Ok(Observation::Proceed);
                    }
                    let poll = self.inner.health_settings.poll_interval.min(give_up_at - now);
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        reason = abort_requested(abort_rx) => return Ok(Observation::Aborted(reason)),
                        _ = next_alarm(alarms, green) => {}
                    }
                }
            }
        }
    }

    fn audit_verdict(
        &self,
        deployment: &Deployment,
        step: &TrafficStep,
        verdict: HealthVerdict,
        note: &str,
    ) {
        info!(
            deployment = %deployment.id,
            fleet = %deployment.green_fleet,
            step = step.index + 1,
            ?verdict,
            "health evaluated"
        );
        let verdict = match verdict {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::Unhealthy => "unhealthy",
            HealthVerdict::Inconclusive => "inconclusive",
        };
        self.inner.audit.record(
            Entry::new(
                AuditKind::HealthEvaluated,
                format!("step {} at {}%: {verdict} ({note})", step.index + 1, step.target),
            )
            .deployment(&deployment.id)
            .fleet(&deployment.green_fleet),
        );
    }

    async fn roll_back(&self, mut deployment: Deployment, cause: Rollback) -> CutoverResult<()> {
        let pending = match cause {
            Rollback::Unhealthy { step, target } => PendingRollback {
                reason: format!(
                    "green fleet {} unhealthy after step {} ({target}%)",
                    deployment.green_fleet,
                    step + 1
                ),
                mark_unhealthy: true,
            },
            Rollback::Aborted(reason) => PendingRollback {
                reason: format!("aborted: {reason}"),
                mark_unhealthy: false,
            },
        };
        deployment.pending_rollback = Some(pending);
        self.inner.store.put_deployment(&deployment)?;
        self.finish_rollback(deployment).await
    }

    /// Revert traffic and record `RolledBack`. Safe to repeat after a crash.
    async fn finish_rollback(&self, mut deployment: Deployment) -> CutoverResult<()> {
        let Some(pending) = deployment.pending_rollback.clone() else {
            return Ok(());
        };
        self.inner
            .shifter
            .revert(&deployment.id, &deployment.blue_fleet, &deployment.green_fleet)
            .await?;
        if pending.mark_unhealthy {
            self.inner
                .registry
                .set_health(&deployment.green_fleet, HealthStatus::Unhealthy)?;
        }

        let reason = pending.reason;
        deployment.status = DeploymentStatus::RolledBack;
        deployment.reason = Some(reason.clone());
        deployment.ended_at = Some(epoch_secs());
        deployment.pending_rollback = None;
        self.inner.store.put_deployment(&deployment)?;

        warn!(deployment = %deployment.id, %reason, "deployment rolled back");
        self.inner.audit.record(
            Entry::new(AuditKind::RolledBack, reason).deployment(&deployment.id),
        );
        Ok(())
    }

    async fn complete(&self, mut deployment: Deployment) -> CutoverResult<()> {
        let green = self.inner.registry.get(&deployment.green_fleet)?;
        let (new_blue, old_blue) = if green.role == FleetRole::Blue {
            // Promoted before a restart; only the record is missing.
            info!(deployment = %deployment.id, fleet = %green.id, "green fleet already promoted");
            (green, self.inner.registry.get(&deployment.blue_fleet)?)
        } else {
            self.inner.registry.promote(&deployment.green_fleet)?
        };
        self.inner
            .lifecycle
            .promote(&new_blue, &old_blue)
            .await
            .map_err(|e| CutoverError::Lifecycle(format!("{e:#}")))?;

        let retain = self.inner.settings.blue_fleet_retain;
        deployment.status = DeploymentStatus::Succeeded;
        deployment.reason = None;
        deployment.ended_at = Some(epoch_secs());
        deployment.pending_retirement = Some(PendingRetirement {
            fleet_id: old_blue.id.clone(),
            due_at: epoch_secs().saturating_add(retain.as_secs()),
        });
        self.inner.store.put_deployment(&deployment)?;

        info!(
            deployment = %deployment.id,
            promoted = %new_blue.id,
            retiring = %old_blue.id,
            ?retain,
            "deployment succeeded"
        );
        self.inner.audit.record(
            Entry::new(
                AuditKind::Succeeded,
                format!("{} promoted, {} retires in {}s", new_blue.id, old_blue.id, retain.as_secs()),
            )
            .deployment(&deployment.id),
        );

        self.schedule_retirement(&deployment.id, &old_blue.id, retain);
        Ok(())
    }

    fn fail(&self, id: &str, err: &CutoverError) {
        error!(deployment = %id, error = %err, "deployment failed");
        match self.load(id) {
            Ok(mut deployment) if !deployment.status.is_terminal() => {
                deployment.status = DeploymentStatus::Failed;
                deployment.reason = Some(err.to_string());
                deployment.ended_at = Some(epoch_secs());
                if let Err(e) = self.inner.store.put_deployment(&deployment) {
                    error!(deployment = %id, error = %e, "failed to persist failed status");
                }
            }
            Ok(_) => {}
            Err(e) => error!(deployment = %id, error = %e, "failed to load deployment"),
        }
        self.inner
            .audit
            .record(Entry::new(AuditKind::Failed, err.to_string()).deployment(id));
    }

    fn schedule_retirement(&self, deployment_id: &str, fleet_id: &str, delay: Duration) {
        let controller = self.clone();
        let deployment = deployment_id.to_string();
        let fleet = fleet_id.to_string();
        debug!(deployment = %deployment_id, fleet = %fleet_id, ?delay, "retirement scheduled");

        // Held across the spawn so the task cannot remove its entry first.
        let mut retirements = self.retirements();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.retire_after_cutover(&deployment, &fleet).await;
            controller.retirements().remove(&deployment);
        });
        if let Some(old) = retirements.insert(deployment_id.to_string(), handle) {
            old.abort();
        }
    }

    async fn retire_after_cutover(&self, deployment_id: &str, fleet_id: &str) {
        match self.active_deployment_for(fleet_id) {
            Ok(Some(other)) => {
                warn!(
                    fleet = %fleet_id,
                    deployment = %other,
                    "fleet is part of another deployment, keeping it"
                );
            }
            Ok(None) => match self.retire_fleet(fleet_id).await {
                Ok(_) => {}
                Err(CutoverError::Registry(RegistryError::FleetNotFound(_))) => {
                    debug!(fleet = %fleet_id, "fleet already gone");
                }
                Err(e) => {
                    warn!(fleet = %fleet_id, error = %e, "scheduled retirement failed");
                    return;
                }
            },
            Err(e) => {
                warn!(fleet = %fleet_id, error = %e, "scheduled retirement failed");
                return;
            }
        }

        match self.load(deployment_id) {
            Ok(mut deployment) => {
                deployment.pending_retirement = None;
                if let Err(e) = self.inner.store.put_deployment(&deployment) {
                    warn!(deployment = %deployment_id, error = %e, "failed to clear retirement");
                }
            }
            Err(e) => warn!(deployment = %deployment_id, error = %e, "failed to clear retirement"),
        }
    }
}

/// Hold still owed by the step applied before a restart.
fn remaining_hold(deployment: &Deployment) -> Option<Duration> {
    let step = deployment.current_step()?;
    let applied_at = deployment.step_applied_at?;
    let elapsed = Duration::from_secs(epoch_secs().saturating_sub(applied_at));
    Some(step.hold().saturating_sub(elapsed))
}

/// Resolves with the abort reason once one is set. Never resolves if the
/// sender is gone.
async fn abort_requested(rx: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves on the next triggered signal for `fleet_id`.
async fn next_alarm(rx: &mut broadcast::Receiver<HealthSignal>, fleet_id: &str) {
    loop {
        match rx.recv().await {
            Ok(signal) if signal.fleet_id == fleet_id => return,
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "alarm receiver lagged, re-evaluating");
                return;
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
