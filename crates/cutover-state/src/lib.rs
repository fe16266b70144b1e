//! cutover-state: embedded state store and audit log for Cutover.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for fleets, deployments and audit events.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Audit events are keyed by a zero-padded sequence number so a table scan
//! returns them in append order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod audit;
pub mod error;
pub mod store;
pub mod tables;

pub use audit::AuditLog;
pub use error::{StateError, StateResult};
pub use store::StateStore;
