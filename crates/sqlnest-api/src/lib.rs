//! sqlnest-api — REST API for the sqlnest broker.
//!
//! Provides axum route handlers for the template lifecycle and test
//! database handout. The wire shapes are part of the client contract:
//! test databases serialize as `{"id":N,"database":{…}}` with camelCase
//! field names.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/templates` | Initialize a template |
//! | PUT | `/api/v1/templates/{hash}` | Finalize a template |
//! | DELETE | `/api/v1/templates/{hash}` | Discard a template |
//! | GET | `/api/v1/templates/{hash}/tests` | Get a test database |
//! | DELETE | `/api/v1/templates/{hash}/tests/{id}` | Return a test database |
//! | GET | `/api/v1/pools` | Per-hash slot counters |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use sqlnest_pool::Manager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<Manager>,
}

/// Build the complete API router.
pub fn build_router(manager: Arc<Manager>) -> Router {
    let state = ApiState { manager };

    let api_routes = Router::new()
        .route("/templates", post(handlers::initialize_template))
        .route(
            "/templates/{hash}",
            put(handlers::finalize_template).delete(handlers::discard_template),
        )
        .route("/templates/{hash}/tests", get(handlers::get_test_database))
        .route(
            "/templates/{hash}/tests/{id}",
            delete(handlers::return_test_database),
        )
        .route("/pools", get(handlers::pool_stats))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
