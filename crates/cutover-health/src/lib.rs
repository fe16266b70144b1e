//! cutover-health: health signal evaluation for Cutover.
//!
//! The monitor consumes `HealthSignal`s (pushed alarm results or synthetic
//! probe results) and answers "is this fleet healthy over the last
//! window?" for the cutover state machine.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── per-fleet signal queue (arrival instant + signal)
//!   ├── evaluate(fleet, window) → Healthy | Unhealthy | Inconclusive
//!   └── alarm broadcast (triggered signals only)
//!
//! SyntheticChecks
//!   └── per-fleet background task
//!       ├── http_probe() → ProbeResult
//!       └── HealthMonitor::record(synthetic:http signal)
//! ```
//!
//! # Policy
//!
//! A single triggered signal inside the window makes the fleet unhealthy.
//! There is no averaging. Fewer than `min_signals` observations yields
//! `Inconclusive`, which callers must never treat as safe.

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
pub use probe::{http_probe, ProbeResult, SyntheticChecks, SYNTHETIC_SOURCE};
