//! tablegrid-api: REST API for tablegrid.
//!
//! Binds the pipeline control surface and the owner notification surface to
//! axum routes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/pipeline` | Validate and create a pipeline |
//! | GET | `/api/v1/pipeline?status=` | List pipelines |
//! | GET | `/api/v1/pipeline/{id}` | Get a pipeline |
//! | DELETE | `/api/v1/pipeline/{id}` | Delete a disabled pipeline |
//! | POST | `/api/v1/pipeline/{id}/enable` | Enable a pipeline |
//! | POST | `/api/v1/pipeline/{id}/disable` | Disable a pipeline |
//! | GET | `/api/v1/layout` | Latest announced layout |
//! | GET | `/api/v1/owners` | Active owners |
//! | PUT | `/api/v1/owners/{owner}` | Register an active owner |
//! | DELETE | `/api/v1/owners/{owner}` | Unregister an owner |
//! | POST | `/api/v1/owners/{owner}/ack` | Acknowledge the announced layout |
//! | POST | `/api/v1/flow_errors` | Report a failed flow installation |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tablegrid_reconcile::{PipelineControl, ReconcileEngine, WatchPublisher};
use tablegrid_state::PipelineStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: PipelineStore,
    pub control: PipelineControl,
    pub engine: Arc<ReconcileEngine>,
    pub publisher: Arc<WatchPublisher>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/pipeline",
            get(handlers::list_pipelines).post(handlers::create_pipeline),
        )
        .route(
            "/pipeline/{id}",
            get(handlers::get_pipeline).delete(handlers::delete_pipeline),
        )
        .route("/pipeline/{id}/enable", post(handlers::enable_pipeline))
        .route("/pipeline/{id}/disable", post(handlers::disable_pipeline))
        .route("/layout", get(handlers::current_layout))
        .route("/owners", get(handlers::list_owners))
        .route(
            "/owners/{owner}",
            put(handlers::register_owner).delete(handlers::unregister_owner),
        )
        .route("/owners/{owner}/ack", post(handlers::acknowledge_layout))
        .route("/flow_errors", post(handlers::flow_error))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
