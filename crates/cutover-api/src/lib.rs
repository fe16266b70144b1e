//! cutover-api: REST API for Cutover.
//!
//! Axum route handlers for registering fleets, creating and driving
//! deployments, pushing health signals and reading the audit log.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/fleets` | List fleets |
//! | POST | `/api/v1/fleets` | Register a fleet |
//! | GET | `/api/v1/fleets/{id}` | Get a fleet |
//! | DELETE | `/api/v1/fleets/{id}` | Retire a fleet |
//! | GET | `/api/v1/deployments` | List deployments |
//! | POST | `/api/v1/deployments` | Create a deployment |
//! | GET | `/api/v1/deployments/{id}` | Deployment status |
//! | POST | `/api/v1/deployments/{id}/start` | Start a deployment |
//! | POST | `/api/v1/deployments/{id}/abort` | Abort a deployment |
//! | GET | `/api/v1/deployments/{id}/events` | Audit events for a deployment |
//! | POST | `/api/v1/signals` | Push a health signal |
//! | GET | `/api/v1/events` | Full audit log |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use cutover_rollout::CutoverController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: CutoverController,
}

/// Build the complete API router.
pub fn build_router(controller: CutoverController) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/fleets", get(handlers::list_fleets).post(handlers::register_fleet))
        .route("/fleets/{id}", get(handlers::get_fleet).delete(handlers::retire_fleet))
        .route(
            "/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/start", post(handlers::start_deployment))
        .route("/deployments/{id}/abort", post(handlers::abort_deployment))
        .route("/deployments/{id}/events", get(handlers::deployment_events))
        .route("/signals", post(handlers::push_signal))
        .route("/events", get(handlers::list_events))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
