//! director-api — REST API for the Director.
//!
//! Provides axum route handlers over the [`Director`] facade. Every route
//! under `/api/v1` is tenant-scoped through the `x-tenant-id` header; the
//! caller kind comes from `x-consumer-type` (defaults to `USER`).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET/POST | `/api/v1/applications` | List (paged) / register applications |
//! | GET/PUT/DELETE | `/api/v1/applications/{id}` | Get / update / unregister |
//! | POST | `/api/v1/applications/{id}/unpair` | Unpair an application |
//! | POST | `/api/v1/applications/{id}/merge` | Merge a source application into this one |
//! | PUT/DELETE | `/api/v1/applications/{id}/labels/{key}` | Set / delete a label |
//! | GET/POST | `/api/v1/runtimes` | List / register runtimes |
//! | GET/DELETE | `/api/v1/runtimes/{id}` | Get / unregister |
//! | PUT/DELETE | `/api/v1/runtimes/{id}/labels/{key}` | Set / delete a label |
//! | GET | `/api/v1/runtimes/{id}/applications` | Applications visible to the runtime |
//! | GET/POST | `/api/v1/formations` | List / create formations |
//! | GET/DELETE | `/api/v1/formations/{name}` | Get / delete a formation |
//! | POST | `/api/v1/formations/{name}/assign` | Assign a resource |
//! | POST | `/api/v1/formations/{name}/unassign` | Unassign a resource |
//! | GET | `/api/v1/formations/{name}/members` | Member IDs, optional `?type=` |
//! | GET/POST | `/api/v1/formation-templates` | List / upsert templates |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post, put};
use director_formation::Director;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub director: Director,
}

/// Build the complete API router.
pub fn build_router(director: Director) -> Router {
    let api_state = ApiState { director };

    let api_routes = Router::new()
        .route(
            "/applications",
            get(handlers::list_applications).post(handlers::register_application),
        )
        .route(
            "/applications/{id}",
            get(handlers::get_application)
                .put(handlers::update_application)
                .delete(handlers::unregister_application),
        )
        .route("/applications/{id}/unpair", post(handlers::unpair_application))
        .route("/applications/{id}/merge", post(handlers::merge_applications))
        .route(
            "/applications/{id}/labels/{key}",
            put(handlers::set_application_label).delete(handlers::delete_application_label),
        )
        .route(
            "/runtimes",
            get(handlers::list_runtimes).post(handlers::register_runtime),
        )
        .route(
            "/runtimes/{id}",
            get(handlers::get_runtime).delete(handlers::unregister_runtime),
        )
        .route(
            "/runtimes/{id}/labels/{key}",
            put(handlers::set_runtime_label).delete(handlers::delete_runtime_label),
        )
        .route(
            "/runtimes/{id}/applications",
            get(handlers::applications_for_runtime),
        )
        .route(
            "/formations",
            get(handlers::list_formations).post(handlers::create_formation),
        )
        .route(
            "/formations/{name}",
            get(handlers::get_formation).delete(handlers::delete_formation),
        )
        .route("/formations/{name}/assign", post(handlers::assign_formation))
        .route("/formations/{name}/unassign", post(handlers::unassign_formation))
        .route("/formations/{name}/members", get(handlers::formation_members))
        .route(
            "/formation-templates",
            get(handlers::list_formation_templates).post(handlers::put_formation_template),
        )
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
