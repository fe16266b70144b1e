//! Fleet registry: the source of truth for roles, weights and health.
//!
//! Every mutation is written to the state store before the in-memory copy
//! changes, and every mutation leaves an audit record. Per service there is
//! at most one blue and one green fleet, and the weights of a pair always
//! sum to 100 once the pair exists.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use tracing::{debug, info};

use cutover_core::{epoch_secs, AuditKind, Fleet, FleetId, FleetRole, HealthStatus};
use cutover_state::audit::Entry;
use cutover_state::{AuditLog, StateStore};

use crate::error::RegistryError;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registration request for a fleet.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFleet {
    pub id: FleetId,
    pub service: String,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub probe_address: Option<String>,
}

/// Shared fleet registry.
#[derive(Clone)]
pub struct FleetRegistry {
    fleets: Arc<RwLock<HashMap<FleetId, Fleet>>>,
    store: StateStore,
    audit: AuditLog,
}

impl FleetRegistry {
    /// Open the registry, loading every persisted fleet.
    pub fn open(store: StateStore, audit: AuditLog) -> RegistryResult<Self> {
        let fleets: HashMap<FleetId, Fleet> = store
            .list_fleets()?
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();
        debug!(count = fleets.len(), "fleet registry loaded");
        Ok(Self {
            fleets: Arc::new(RwLock::new(fleets)),
            store,
            audit,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<FleetId, Fleet>> {
        self.fleets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<FleetId, Fleet>> {
        self.fleets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fleet.
    ///
    /// The first fleet of a service becomes blue with all the traffic, the
    /// second becomes green with none. A service never has two greens.
    pub fn register(&self, new: NewFleet) -> RegistryResult<Fleet> {
        let mut fleets = self.write();
        if fleets.contains_key(&new.id) {
            return Err(RegistryError::DuplicateFleet(new.id));
        }

        let siblings: Vec<&Fleet> = fleets.values().filter(|f| f.service == new.service).collect();
        if let Some(green) = siblings.iter().find(|f| f.role == FleetRole::Green) {
            return Err(RegistryError::GreenAlreadyRegistered {
                service: new.service,
                green: green.id.clone(),
            });
        }
        let (role, weight) = if siblings.iter().any(|f| f.role == FleetRole::Blue) {
            (FleetRole::Green, 0)
        } else {
            (FleetRole::Blue, 100)
        };

        let fleet = Fleet {
            id: new.id,
            service: new.service,
            role,
            weight,
            health: HealthStatus::Unknown,
            image_tag: new.image_tag,
            probe_address: new.probe_address,
            created_at: epoch_secs(),
        };
        self.store.put_fleet(&fleet)?;
        fleets.insert(fleet.id.clone(), fleet.clone());
        drop(fleets);

        info!(fleet = %fleet.id, service = %fleet.service, ?role, weight, "fleet registered");
        self.audit.record(
            Entry::new(
                AuditKind::FleetRegistered,
                format!("service={} role={role:?} weight={weight}", fleet.service),
            )
            .fleet(&fleet.id),
        );
        Ok(fleet)
    }

    pub fn get(&self, id: &str) -> RegistryResult<Fleet> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(id.to_string()))
    }

    /// All fleets, sorted by id.
    pub fn list(&self) -> Vec<Fleet> {
        let mut fleets: Vec<Fleet> = self.read().values().cloned().collect();
        fleets.sort_by(|a, b| a.id.cmp(&b.id));
        fleets
    }

    pub fn list_for_service(&self, service: &str) -> Vec<Fleet> {
        let mut fleets: Vec<Fleet> = self
            .read()
            .values()
            .filter(|f| f.service == service)
            .cloned()
            .collect();
        fleets.sort_by(|a, b| a.id.cmp(&b.id));
        fleets
    }

    /// Set the weight of a single fleet.
    pub fn set_weight(&self, id: &str, weight: u8) -> RegistryResult<Fleet> {
        if weight > 100 {
            return Err(RegistryError::InvalidWeight {
                fleet_id: id.to_string(),
                weight,
                reason: "weight must be between 0 and 100",
            });
        }

        let mut fleets = self.write();
        let mut fleet = fleets
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(id.to_string()))?;
        let previous = fleet.weight;
        fleet.weight = weight;
        self.store.put_fleet(&fleet)?;
        fleets.insert(fleet.id.clone(), fleet.clone());
        drop(fleets);

        self.audit.record(
            Entry::new(AuditKind::WeightChanged, format!("{previous} -> {weight}")).fleet(id),
        );
        Ok(fleet)
    }

    /// Give `green_weight` to the green fleet and the remainder to blue.
    ///
    /// Both fleets are written in one store transaction and swapped in under
    /// one lock, so no reader ever sees a split that does not sum to 100.
    pub fn set_pair_weights(
        &self,
        blue_id: &str,
        green_id: &str,
        green_weight: u8,
    ) -> RegistryResult<(Fleet, Fleet)> {
        if green_weight > 100 {
            return Err(RegistryError::InvalidWeight {
                fleet_id: green_id.to_string(),
                weight: green_weight,
                reason: "weight must be between 0 and 100",
            });
        }

        let mut fleets = self.write();
        let mut blue = fleets
            .get(blue_id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(blue_id.to_string()))?;
        let mut green = fleets
            .get(green_id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(green_id.to_string()))?;
        if blue.service != green.service {
            return Err(RegistryError::InvalidWeight {
                fleet_id: green_id.to_string(),
                weight: green_weight,
                reason: "fleets belong to different services",
            });
        }

        let previous = green.weight;
        blue.weight = 100 - green_weight;
        green.weight = green_weight;
        self.store.put_fleets(&[blue.clone(), green.clone()])?;
        fleets.insert(blue.id.clone(), blue.clone());
        fleets.insert(green.id.clone(), green.clone());
        drop(fleets);

        debug!(blue = %blue.id, green = %green.id, green_weight, "pair weights updated");
        self.audit.record(
            Entry::new(
                AuditKind::WeightChanged,
                format!("{previous} -> {green_weight} (blue {} = {})", blue.id, blue.weight),
            )
            .fleet(green_id),
        );
        Ok((blue, green))
    }

    /// Record a health status. Audited only when it changes.
    pub fn set_health(&self, id: &str, health: HealthStatus) -> RegistryResult<Fleet> {
        let mut fleets = self.write();
        let mut fleet = fleets
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(id.to_string()))?;
        if fleet.health == health {
            return Ok(fleet);
        }

        let previous = fleet.health;
        fleet.health = health;
        self.store.put_fleet(&fleet)?;
        fleets.insert(fleet.id.clone(), fleet.clone());
        drop(fleets);

        self.audit.record(
            Entry::new(AuditKind::HealthChanged, format!("{previous:?} -> {health:?}")).fleet(id),
        );
        Ok(fleet)
    }

    /// Promote the green fleet of a service to blue.
    ///
    /// The former blue is demoted to green and keeps its (zero) weight until
    /// it is retired. Returns `(new_blue, old_blue)`.
    pub fn promote(&self, green_id: &str) -> RegistryResult<(Fleet, Fleet)> {
        let mut fleets = self.write();
        let mut green = fleets
            .get(green_id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(green_id.to_string()))?;
        if green.role != FleetRole::Green {
            return Err(RegistryError::NoActiveGreen(green_id.to_string()));
        }
        if green.weight != 100 {
            return Err(RegistryError::InvalidWeight {
                fleet_id: green.id,
                weight: green.weight,
                reason: "promotion requires all traffic on the green fleet",
            });
        }
        let mut blue = fleets
            .values()
            .find(|f| f.service == green.service && f.role == FleetRole::Blue)
            .cloned()
            .ok_or_else(|| RegistryError::NoActiveGreen(green_id.to_string()))?;

        green.role = FleetRole::Blue;
        blue.role = FleetRole::Green;
        self.store.put_fleets(&[green.clone(), blue.clone()])?;
        fleets.insert(green.id.clone(), green.clone());
        fleets.insert(blue.id.clone(), blue.clone());
        drop(fleets);

        info!(service = %green.service, fleet = %green.id, demoted = %blue.id, "fleet promoted to blue");
        self.audit.record(
            Entry::new(
                AuditKind::FleetPromoted,
                format!("demoted {} to green", blue.id),
            )
            .fleet(&green.id),
        );
        Ok((green, blue))
    }

    /// Remove a fleet that no longer receives traffic.
    pub fn retire(&self, id: &str) -> RegistryResult<Fleet> {
        let mut fleets = self.write();
        let fleet = fleets
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::FleetNotFound(id.to_string()))?;
        if fleet.weight > 0 {
            return Err(RegistryError::StillRoutable {
                fleet_id: fleet.id,
                weight: fleet.weight,
            });
        }

        self.store.delete_fleet(id)?;
        fleets.remove(id);
        drop(fleets);

        info!(fleet = %id, service = %fleet.service, "fleet removed from registry");
        self.audit.record(
            Entry::new(AuditKind::FleetRetired, format!("service={}", fleet.service)).fleet(id),
        );
        Ok(fleet)
    }
}
