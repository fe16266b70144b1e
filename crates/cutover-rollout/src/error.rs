//! Rollout error types.

use thiserror::Error;

use cutover_core::{DeploymentId, FleetId};
use cutover_state::StateError;

/// Errors from the fleet registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("fleet already registered: {0}")]
    DuplicateFleet(FleetId),

    #[error("service {service} already has a green fleet: {green}")]
    GreenAlreadyRegistered { service: String, green: FleetId },

    #[error("fleet not found: {0}")]
    FleetNotFound(FleetId),

    #[error("invalid weight {weight} for fleet {fleet_id}: {reason}")]
    InvalidWeight {
        fleet_id: FleetId,
        weight: u8,
        reason: &'static str,
    },

    #[error("fleet {0} is not the active green fleet of its service")]
    NoActiveGreen(FleetId),

    #[error("fleet {fleet_id} still receives {weight}% of traffic")]
    StillRoutable { fleet_id: FleetId, weight: u8 },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Errors from applying a traffic shift.
#[derive(Debug, Error)]
pub enum ShiftError {
    #[error("a traffic shift is already in flight for deployment {0}")]
    Conflict(DeploymentId),

    #[error("traffic router failed: {0}")]
    Router(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors surfaced by the cutover controller.
#[derive(Debug, Error)]
pub enum CutoverError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("deployment already exists: {0}")]
    DeploymentExists(DeploymentId),

    #[error("deployment {0} is already in progress")]
    AlreadyStarted(DeploymentId),

    #[error("deployment {0} is in progress but not running in this process")]
    NotRunning(DeploymentId),

    #[error("fleet {fleet} is already part of active deployment {deployment}")]
    FleetBusy {
        fleet: FleetId,
        deployment: DeploymentId,
    },

    #[error("deployment {0} is already terminal")]
    AlreadyTerminal(DeploymentId),

    #[error("fleet lifecycle manager failed: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Shift(#[from] ShiftError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type CutoverResult<T> = Result<T, CutoverError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Nothing changed; fix the request and retry.
    Validation,
    /// The named deployment does not exist.
    NotFound,
    /// Something else holds the resource. Back off and retry.
    Conflict,
    /// The deployment has already finished.
    Terminal,
    /// A store or collaborator failed. Needs an operator.
    Infrastructure,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::FleetNotFound(_)
            | RegistryError::InvalidWeight { .. }
            | RegistryError::NoActiveGreen(_) => ErrorKind::Validation,
            RegistryError::DuplicateFleet(_)
            | RegistryError::GreenAlreadyRegistered { .. }
            | RegistryError::StillRoutable { .. } => ErrorKind::Conflict,
            RegistryError::State(_) => ErrorKind::Infrastructure,
        }
    }
}

impl ShiftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShiftError::Conflict(_) => ErrorKind::Conflict,
            ShiftError::Router(_) => ErrorKind::Infrastructure,
            ShiftError::Registry(e) => e.kind(),
        }
    }
}

impl CutoverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CutoverError::Validation(_) => ErrorKind::Validation,
            CutoverError::DeploymentNotFound(_) => ErrorKind::NotFound,
            CutoverError::DeploymentExists(_)
            | CutoverError::AlreadyStarted(_)
            | CutoverError::NotRunning(_)
            | CutoverError::FleetBusy { .. } => ErrorKind::Conflict,
            CutoverError::AlreadyTerminal(_) => ErrorKind::Terminal,
            CutoverError::Lifecycle(_) | CutoverError::State(_) => ErrorKind::Infrastructure,
            CutoverError::Registry(e) => e.kind(),
            CutoverError::Shift(e) => e.kind(),
        }
    }
}
