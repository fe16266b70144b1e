//! StateStore: redb-backed persistence for Cutover.
//!
//! Provides typed CRUD operations over fleets, deployments and audit
//! events. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use cutover_core::{AuditEvent, Deployment, Fleet};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(FLEETS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(AUDIT).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON rows ──────────────────────────────────────────

    fn put_rows<T: Serialize>(&self, table: JsonTable, rows: &[(&str, &T)]) -> StateResult<()> {
        let encoded = rows
            .iter()
            .map(|(key, value)| {
                serde_json::to_vec(value)
                    .map(|bytes| (*key, bytes))
                    .map_err(map_err!(Serialize))
            })
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            for (key, bytes) in &encoded {
                t.insert(*key, bytes.as_slice()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_rows<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn delete_row(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Fleets ─────────────────────────────────────────────────────

    /// Insert or update a fleet.
    pub fn put_fleet(&self, fleet: &Fleet) -> StateResult<()> {
        self.put_fleets(std::slice::from_ref(fleet))
    }

    /// Insert or update several fleets in a single transaction.
    pub fn put_fleets(&self, fleets: &[Fleet]) -> StateResult<()> {
        let rows: Vec<(&str, &Fleet)> = fleets.iter().map(|f| (f.id.as_str(), f)).collect();
        self.put_rows(FLEETS, &rows)?;
        debug!(count = fleets.len(), "fleets stored");
        Ok(())
    }

    pub fn get_fleet(&self, id: &str) -> StateResult<Option<Fleet>> {
        self.get_row(FLEETS, id)
    }

    pub fn list_fleets(&self) -> StateResult<Vec<Fleet>> {
        self.list_rows(FLEETS)
    }

    /// Delete a fleet by id. Returns true if it existed.
    pub fn delete_fleet(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete_row(FLEETS, id)?;
        debug!(fleet = %id, existed, "fleet deleted");
        Ok(existed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record, including its steps and cursor.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_rows(DEPLOYMENTS, &[(deployment.id.as_str(), deployment)])?;
        debug!(
            deployment = %deployment.id,
            status = ?deployment.status,
            phase = deployment.phase_index,
            "deployment stored"
        );
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get_row(DEPLOYMENTS, id)
    }

    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        self.list_rows(DEPLOYMENTS)
    }

    // ── Audit ──────────────────────────────────────────────────────

    /// Append one audit event. Each event is its own write transaction.
    pub fn put_audit_event(&self, event: &AuditEvent) -> StateResult<()> {
        let key = audit_key(event.seq);
        self.put_rows(AUDIT, &[(key.as_str(), event)])
    }

    /// All audit events in append order.
    pub fn list_audit_events(&self) -> StateResult<Vec<AuditEvent>> {
        self.list_rows(AUDIT)
    }

    /// Highest sequence number stored so far.
    pub fn last_audit_seq(&self) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(AUDIT).map_err(map_err!(Table))?;
        match t.last().map_err(map_err!(Read))? {
            Some((_, value)) => {
                let event: AuditEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(event.seq))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::*;

    fn test_fleet(id: &str, role: FleetRole, weight: u8) -> Fleet {
        Fleet {
            id: id.to_string(),
            service: "api".to_string(),
            role,
            weight,
            health: HealthStatus::Unknown,
            image_tag: Some("sha-abc123".to_string()),
            probe_address: None,
            created_at: 1000,
        }
    }

    fn test_deployment(id: &str) -> Deployment {
        Deployment {
            id: id.to_string(),
            service: "api".to_string(),
            blue_fleet: "blue".to_string(),
            green_fleet: "green".to_string(),
            image_tag: Some("sha-abc123".to_string()),
            strategy: RoutingStrategy::Canary {
                percentage: 10,
                bake_minutes: 5,
            },
            steps: vec![
                TrafficStep {
                    index: 0,
                    target: 10,
                    offset_secs: 0,
                    hold_secs: 300,
                },
                TrafficStep {
                    index: 1,
                    target: 100,
                    offset_secs: 300,
                    hold_secs: 0,
                },
            ],
            phase_index: 0,
            status: DeploymentStatus::Pending,
            reason: None,
            created_at: 1000,
            started_at: None,
            ended_at: None,
            step_applied_at: None,
            pending_retirement: None,
            pending_rollback: None,
        }
    }

    fn test_event(seq: u64, deployment: Option<&str>) -> AuditEvent {
        AuditEvent {
            seq,
            at: 1_000_000 + seq,
            deployment_id: deployment.map(str::to_string),
            fleet_id: None,
            kind: AuditKind::StepApplied,
            detail: format!("event {seq}"),
        }
    }

    // ── Fleet CRUD ─────────────────────────────────────────────────

    #[test]
    fn fleet_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let fleet = test_fleet("blue", FleetRole::Blue, 100);

        store.put_fleet(&fleet).unwrap();
        assert_eq!(store.get_fleet("blue").unwrap(), Some(fleet));
    }

    #[test]
    fn fleets_written_together() {
        let store = StateStore::open_in_memory().unwrap();
        let mut blue = test_fleet("blue", FleetRole::Blue, 100);
        let mut green = test_fleet("green", FleetRole::Green, 0);
        store.put_fleets(&[blue.clone(), green.clone()]).unwrap();

        blue.weight = 90;
        green.weight = 10;
        store.put_fleets(&[blue, green]).unwrap();

        let weights: u32 = store
            .list_fleets()
            .unwrap()
            .iter()
            .map(|f| u32::from(f.weight))
            .sum();
        assert_eq!(weights, 100);
        assert_eq!(store.get_fleet("green").unwrap().unwrap().weight, 10);
    }

    #[test]
    fn fleet_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_fleet(&test_fleet("old", FleetRole::Green, 0)).unwrap();

        assert!(store.delete_fleet("old").unwrap());
        assert!(!store.delete_fleet("old").unwrap());
        assert!(store.get_fleet("old").unwrap().is_none());
    }

    // ── Deployment CRUD ────────────────────────────────────────────

    #[test]
    fn deployment_put_and_get_keeps_steps_and_cursor() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = test_deployment("deploy-1");
        d.phase_index = 1;
        d.status = DeploymentStatus::InProgress;

        store.put_deployment(&d).unwrap();
        let back = store.get_deployment("deploy-1").unwrap().unwrap();
        assert_eq!(back, d);
        assert_eq!(back.steps.len(), 2);
        assert_eq!(back.phase_index, 1);
    }

    #[test]
    fn deployment_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("a")).unwrap();
        store.put_deployment(&test_deployment("b")).unwrap();
        assert_eq!(store.list_deployments().unwrap().len(), 2);
    }

    // ── Audit ──────────────────────────────────────────────────────

    #[test]
    fn audit_events_listed_in_sequence_order() {
        let store = StateStore::open_in_memory().unwrap();
        // Insert out of order; keys are zero-padded so the scan sorts numerically.
        for seq in [10, 2, 1, 100] {
            store.put_audit_event(&test_event(seq, Some("d1"))).unwrap();
        }

        let seqs: Vec<u64> = store
            .list_audit_events()
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 10, 100]);
        assert_eq!(store.last_audit_seq().unwrap(), Some(100));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_deployment(&test_deployment("prod-api")).unwrap();
            store.put_fleet(&test_fleet("blue", FleetRole::Blue, 100)).unwrap();
            store.put_audit_event(&test_event(1, None)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_deployment("prod-api").unwrap().is_some());
        assert!(store.get_fleet("blue").unwrap().is_some());
        assert_eq!(store.last_audit_seq().unwrap(), Some(1));
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_fleets().unwrap().is_empty());
        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_audit_events().unwrap().is_empty());
        assert!(store.last_audit_seq().unwrap().is_none());
        assert!(store.get_deployment("nope").unwrap().is_none());
        assert!(!store.delete_fleet("nope").unwrap());
    }
}
