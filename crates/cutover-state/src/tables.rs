//! redb table definitions for the Cutover state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Shape shared by every table: string key, JSON bytes value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Fleets keyed by fleet id.
pub const FLEETS: JsonTable = TableDefinition::new("fleets");

/// Deployment records (steps + cursor included) keyed by deployment id.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Audit events keyed by a 20-digit zero-padded sequence number.
pub const AUDIT: JsonTable = TableDefinition::new("audit");

/// Format an audit sequence number as a sortable key.
pub fn audit_key(seq: u64) -> String {
    format!("{seq:020}")
}
