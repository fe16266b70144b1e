//! Event/audit log: an append-only record of every transition.
//!
//! Appends may come from many deployment tasks at once. Sequence numbers
//! are handed out by an atomic counter and each event is written in its
//! own redb transaction, so records never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use cutover_core::{epoch_millis, AuditEvent, AuditKind};

use crate::error::StateResult;
use crate::store::StateStore;

/// Shared handle to the audit log.
#[derive(Clone)]
pub struct AuditLog {
    store: StateStore,
    next_seq: Arc<AtomicU64>,
}

/// Builder-ish description of an event before it gets a sequence number.
#[derive(Debug, Clone)]
pub struct Entry {
    kind: AuditKind,
    deployment_id: Option<String>,
    fleet_id: Option<String>,
    detail: String,
}

impl Entry {
    pub fn new(kind: AuditKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            deployment_id: None,
            fleet_id: None,
            detail: detail.into(),
        }
    }

    pub fn deployment(mut self, id: &str) -> Self {
        self.deployment_id = Some(id.to_string());
        self
    }

    pub fn fleet(mut self, id: &str) -> Self {
        self.fleet_id = Some(id.to_string());
        self
    }
}

impl AuditLog {
    /// Open the audit log, continuing after the highest stored sequence.
    pub fn open(store: StateStore) -> StateResult<Self> {
        let next = store.last_audit_seq()?.map_or(1, |seq| seq + 1);
        Ok(Self {
            store,
            next_seq: Arc::new(AtomicU64::new(next)),
        })
    }

    /// Append an event and return it with its assigned sequence number.
    pub fn append(&self, entry: Entry) -> StateResult<AuditEvent> {
        let event = AuditEvent {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            at: epoch_millis(),
            deployment_id: entry.deployment_id,
            fleet_id: entry.fleet_id,
            kind: entry.kind,
            detail: entry.detail,
        };
        self.store.put_audit_event(&event)?;
        info!(
            seq = event.seq,
            kind = ?event.kind,
            deployment = event.deployment_id.as_deref().unwrap_or("-"),
            fleet = event.fleet_id.as_deref().unwrap_or("-"),
            detail = %event.detail,
            "audit"
        );
        Ok(event)
    }

    /// Append an event, logging instead of failing if the store rejects it.
    ///
    /// Used on paths where the transition has already happened and the
    /// caller has nothing useful to do with a storage error.
    pub fn record(&self, entry: Entry) {
        let kind = entry.kind;
        if let Err(e) = self.append(entry) {
            warn!(?kind, error = %e, "failed to append audit event");
        }
    }

    /// Every event in append order.
    pub fn list(&self) -> StateResult<Vec<AuditEvent>> {
        self.store.list_audit_events()
    }

    /// Events that reference the given deployment.
    pub fn list_for_deployment(&self, deployment_id: &str) -> StateResult<Vec<AuditEvent>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|e| e.deployment_id.as_deref() == Some(deployment_id))
            .collect())
    }

    /// Events that reference the given fleet.
    pub fn list_for_fleet(&self, fleet_id: &str) -> StateResult<Vec<AuditEvent>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|e| e.fleet_id.as_deref() == Some(fleet_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn append_assigns_increasing_sequence() {
        let log = AuditLog::open(StateStore::open_in_memory().unwrap()).unwrap();

        let a = log
            .append(Entry::new(AuditKind::DeploymentCreated, "created").deployment("d1"))
            .unwrap();
        let b = log
            .append(Entry::new(AuditKind::FleetRegistered, "registered").fleet("blue"))
            .unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(log.list().unwrap().len(), 2);
        assert_eq!(log.list_for_deployment("d1").unwrap(), vec![a]);
        assert_eq!(log.list_for_fleet("blue").unwrap(), vec![b]);
    }

    #[test]
    fn reopen_continues_sequence() {
        let store = StateStore::open_in_memory().unwrap();
        {
            let log = AuditLog::open(store.clone()).unwrap();
            log.record(Entry::new(AuditKind::StepApplied, "one"));
            log.record(Entry::new(AuditKind::StepApplied, "two"));
        }

        let log = AuditLog::open(store).unwrap();
        let next = log.append(Entry::new(AuditKind::Succeeded, "three")).unwrap();
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn concurrent_appends_keep_records_whole() {
        let log = AuditLog::open(StateStore::open_in_memory().unwrap()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        log.record(
                            Entry::new(AuditKind::WeightChanged, format!("thread-{t}-event-{i}"))
                                .deployment(&format!("d{t}")),
                        );
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = log.list().unwrap();
        assert_eq!(events.len(), 200);

        let seqs: HashSet<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs.len(), 200);

        // Every record still pairs its detail with its own deployment.
        for e in &events {
            let t = e.detail.split('-').nth(1).unwrap();
            assert_eq!(e.deployment_id.as_deref(), Some(format!("d{t}").as_str()));
        }
    }
}
