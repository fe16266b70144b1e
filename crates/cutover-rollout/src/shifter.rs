//! Traffic shifter: applies one scheduled step to a blue/green pair.
//!
//! The router is called first; the registry is only updated once the router
//! accepted the split. A failed router call therefore leaves the recorded
//! weights untouched. At most one shift per deployment is in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use cutover_core::{DeploymentId, Fleet};

use crate::error::ShiftError;
use crate::registry::FleetRegistry;
use crate::traffic::TrafficRouter;

pub type ShiftResult<T> = Result<T, ShiftError>;

/// Applies weight changes through the router and records them.
#[derive(Clone)]
pub struct TrafficShifter {
    registry: FleetRegistry,
    router: Arc<dyn TrafficRouter>,
    in_flight: Arc<Mutex<HashSet<DeploymentId>>>,
}

/// Marks a deployment as shifting until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<DeploymentId>>>,
    deployment_id: DeploymentId,
}

impl InFlight {
    fn acquire(set: &Arc<Mutex<HashSet<DeploymentId>>>, deployment_id: &str) -> ShiftResult<Self> {
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(deployment_id.to_string()) {
            return Err(ShiftError::Conflict(deployment_id.to_string()));
        }
        Ok(Self {
            set: Arc::clone(set),
            deployment_id: deployment_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(&self.deployment_id);
    }
}

impl TrafficShifter {
    pub fn new(registry: FleetRegistry, router: Arc<dyn TrafficRouter>) -> Self {
        Self {
            registry,
            router,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Route `target` percent to green for a deployment.
    ///
    /// Returns the updated `(blue, green)` fleets.
    pub async fn apply_step(
        &self,
        deployment_id: &str,
        blue_id: &str,
        green_id: &str,
        target: u8,
    ) -> ShiftResult<(Fleet, Fleet)> {
        let _in_flight = InFlight::acquire(&self.in_flight, deployment_id)?;

        let blue = self.registry.get(blue_id)?;
        let green = self.registry.get(green_id)?;

        if let Err(e) = self.router.set_weights(&blue, &green, target).await {
            warn!(
                deployment = %deployment_id,
                green = %green_id,
                target,
                error = %e,
                "router rejected weight change"
            );
            return Err(ShiftError::Router(format!("{e:#}")));
        }

        let pair = self.registry.set_pair_weights(blue_id, green_id, target)?;
        info!(
            deployment = %deployment_id,
            blue = %blue_id,
            green = %green_id,
            target,
            "traffic shifted"
        );
        Ok(pair)
    }

    /// Send all traffic back to blue.
    pub async fn revert(
        &self,
        deployment_id: &str,
        blue_id: &str,
        green_id: &str,
    ) -> ShiftResult<(Fleet, Fleet)> {
        self.apply_step(deployment_id, blue_id, green_id, 0).await
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NewFleet;
    use crate::traffic::WeightTable;
    use crate::BoxFuture;
    use cutover_state::{AuditLog, StateStore};
    use tokio::sync::Notify;

    fn registry() -> FleetRegistry {
        let store = StateStore::open_in_memory().unwrap();
        let audit = AuditLog::open(store.clone()).unwrap();
        let registry = FleetRegistry::open(store, audit).unwrap();
        for id in ["blue", "green"] {
            registry
                .register(NewFleet {
                    id: id.to_string(),
                    service: "api".to_string(),
                    image_tag: None,
                    probe_address: None,
                })
                .unwrap();
        }
        registry
    }

    /// Router that blocks until released.
    struct GatedRouter {
        entered: Notify,
        release: Notify,
    }

    impl TrafficRouter for GatedRouter {
        fn set_weights<'a>(
            &'a self,
            _blue: &'a Fleet,
            _green: &'a Fleet,
            _green_weight: u8,
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            })
        }
    }

    struct FailingRouter;

    impl TrafficRouter for FailingRouter {
        fn set_weights<'a>(
            &'a self,
            _blue: &'a Fleet,
            _green: &'a Fleet,
            _green_weight: u8,
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("load balancer unreachable")) })
        }
    }

    #[tokio::test]
    async fn apply_step_updates_router_and_registry() {
        let registry = registry();
        let table = Arc::new(WeightTable::new());
        let shifter = TrafficShifter::new(registry.clone(), table.clone());

        let (blue, green) = shifter.apply_step("d1", "blue", "green", 30).await.unwrap();
        assert_eq!((blue.weight, green.weight), (70, 30));
        assert_eq!(table.weight_of("green"), Some(30));
        assert_eq!(registry.get("blue").unwrap().weight, 70);

        shifter.revert("d1", "blue", "green").await.unwrap();
        assert_eq!(registry.get("green").unwrap().weight, 0);
        assert_eq!(table.weight_of("blue"), Some(100));
    }

    #[tokio::test]
    async fn concurrent_shift_for_same_deployment_conflicts() {
        let registry = registry();
        let router = Arc::new(GatedRouter {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let shifter = TrafficShifter::new(registry.clone(), router.clone());

        let first = {
            let shifter = shifter.clone();
            tokio::spawn(async move { shifter.apply_step("d1", "blue", "green", 10).await })
        };
        router.entered.notified().await;

        let err = shifter.apply_step("d1", "blue", "green", 50).await.unwrap_err();
        assert!(matches!(err, ShiftError::Conflict(id) if id == "d1"));

        router.release.notify_one();
        let (_, green) = first.await.unwrap().unwrap();
        assert_eq!(green.weight, 10);

        // The slot is released once the first shift finished.
        let shifter_next = shifter.clone();
        let next = tokio::spawn(async move { shifter_next.apply_step("d1", "blue", "green", 20).await });
        router.entered.notified().await;
        router.release.notify_one();
        assert_eq!(next.await.unwrap().unwrap().1.weight, 20);
    }

    #[tokio::test]
    async fn router_failure_leaves_weights_unchanged() {
        let registry = registry();
        let shifter = TrafficShifter::new(registry.clone(), Arc::new(FailingRouter));

        let err = shifter.apply_step("d1", "blue", "green", 10).await.unwrap_err();
        assert!(matches!(err, ShiftError::Router(ref msg) if msg.contains("unreachable")));
        assert_eq!(registry.get("blue").unwrap().weight, 100);
        assert_eq!(registry.get("green").unwrap().weight, 0);

        // A failed shift does not hold the slot.
        let err = shifter.apply_step("d1", "blue", "green", 10).await.unwrap_err();
        assert!(matches!(err, ShiftError::Router(_)));
    }

    #[tokio::test]
    async fn unknown_fleet_is_registry_error() {
        let shifter = TrafficShifter::new(registry(), Arc::new(WeightTable::new()));
        let err = shifter.apply_step("d1", "blue", "missing", 10).await.unwrap_err();
        assert!(matches!(err, ShiftError::Registry(_)));
    }
}
