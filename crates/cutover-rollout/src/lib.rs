//! cutover-rollout: blue/green cutover between two fleets.
//!
//! This crate owns the decision logic of a deployment: which weights to
//! apply and when, when to stop and look at health, and whether to finish
//! or roll back.
//!
//! # Components
//!
//! - **`strategy`**: schedules for canary, linear and all-at-once routing
//! - **`registry`**: the fleet registry (roles, weights, health)
//! - **`traffic`**: the `TrafficRouter` seam to the load balancer
//! - **`lifecycle`**: the `FleetLifecycle` seam to the orchestration layer
//! - **`shifter`**: applies one step atomically, one shift per deployment at a time
//! - **`controller`**: the cutover state machine (start, abort, resume)

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod shifter;
pub mod strategy;
pub mod traffic;

use std::future::Future;
use std::pin::Pin;

pub use controller::{ControllerBuilder, CutoverController, NewDeployment};
pub use error::{CutoverError, CutoverResult, ErrorKind, RegistryError, ShiftError};
pub use lifecycle::{FleetLifecycle, LoggingLifecycle};
pub use registry::{FleetRegistry, NewFleet};
pub use shifter::TrafficShifter;
pub use strategy::compute_schedule;
pub use traffic::{TrafficRouter, WeightTable};

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
