//! REST API handlers.
//!
//! Each handler delegates to the [`Manager`] and maps lifecycle errors
//! onto the wire statuses: `423` template already exists, `404` unknown,
//! `410` discarded, `503` pool exhausted or template not finalized in
//! time.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::warn;

use nest_core::Database;
use sqlnest_pool::{ManagerError, PoolError, TemplateError};

use crate::ApiState;

/// Request body for template initialization.
#[derive(serde::Deserialize)]
pub struct TemplateRequest {
    pub hash: String,
}

fn status_for(err: &ManagerError) -> StatusCode {
    match err {
        ManagerError::TemplateAlreadyInitialized => StatusCode::LOCKED,
        ManagerError::Template(TemplateError::NotFound) => StatusCode::NOT_FOUND,
        ManagerError::Template(TemplateError::Discarded) => StatusCode::GONE,
        ManagerError::Template(TemplateError::FinalizeTimeout) => StatusCode::SERVICE_UNAVAILABLE,
        ManagerError::Pool(PoolError::UnknownHash) => StatusCode::NOT_FOUND,
        ManagerError::Pool(PoolError::PoolFull) => StatusCode::SERVICE_UNAVAILABLE,
        ManagerError::Pool(PoolError::UnknownId) => StatusCode::NOT_FOUND,
        ManagerError::Pool(PoolError::InvalidIndex) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ManagerError) -> impl IntoResponse {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "request failed");
    }
    (
        status,
        Json(serde_json::json!({ "message": err.to_string() })),
    )
}

/// POST /api/v1/templates
pub async fn initialize_template(
    State(state): State<ApiState>,
    Json(req): Json<TemplateRequest>,
) -> impl IntoResponse {
    match state.manager.initialize_template(&req.hash).await {
        Ok(template) => {
            let database = Database {
                template_hash: template.hash,
                config: template.config,
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({ "database": database })),
            )
                .into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// PUT /api/v1/templates/{hash}
pub async fn finalize_template(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    match state.manager.finalize_template(&hash).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// DELETE /api/v1/templates/{hash}
pub async fn discard_template(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    match state.manager.discard_template(&hash).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/v1/templates/{hash}/tests
pub async fn get_test_database(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_test_database(&hash).await {
        Ok((db, _is_dirty)) => (StatusCode::OK, Json(db)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// DELETE /api/v1/templates/{hash}/tests/{id}
pub async fn return_test_database(
    State(state): State<ApiState>,
    Path((hash, id)): Path<(String, usize)>,
) -> impl IntoResponse {
    match state.manager.return_test_database(&hash, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/v1/pools
pub async fn pool_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.manager.pool_stats().await)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use nest_core::{BrokerConfig, DatabaseConfig};
    use sqlnest_driver::MemoryDriver;
    use sqlnest_pool::Manager;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state() -> ApiState {
        let config = BrokerConfig {
            connection: DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: 5432,
                username: "postgres".to_string(),
                password: "".to_string(),
                database: "postgres".to_string(),
            },
            root_template: "template0".to_string(),
            db_prefix: "sqlnest".to_string(),
            template_db_prefix: "template".to_string(),
            test_db_prefix: "test".to_string(),
            test_db_owner: "tester".to_string(),
            test_db_owner_password: "tester".to_string(),
            initial_pool_size: 1,
            max_pool_size: 2,
            template_finalize_timeout: Duration::from_millis(100),
            test_db_get_timeout: Duration::from_millis(50),
            cleaning_workers: 1,
            force_return: false,
            listen_port: 0,
        };
        ApiState {
            manager: Manager::new(config, Arc::new(MemoryDriver::new())),
        }
    }

    #[tokio::test]
    async fn initialize_then_duplicate_is_locked() {
        let state = test_state();

        let resp = initialize_template(
            State(state.clone()),
            Json(TemplateRequest {
                hash: "abc".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = initialize_template(
            State(state),
            Json(TemplateRequest {
                hash: "abc".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn finalize_unknown_template_is_not_found() {
        let state = test_state();
        let resp = finalize_template(State(state), Path("zzz".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn finalize_returns_no_content() {
        let state = test_state();
        state.manager.initialize_template("abc").await.unwrap();

        let resp = finalize_template(State(state), Path("abc".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn get_test_database_unknown_hash_is_not_found() {
        let state = test_state();
        let resp = get_test_database(State(state), Path("zzz".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_test_database_returns_payload() {
        let state = test_state();
        state.manager.initialize_template("abc").await.unwrap();
        state.manager.finalize_template("abc").await.unwrap();

        let resp = get_test_database(State(state), Path("abc".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn return_unknown_id_is_not_found() {
        let state = test_state();
        state.manager.initialize_template("abc").await.unwrap();
        state.manager.finalize_template("abc").await.unwrap();

        let resp = return_test_database(State(state), Path(("abc".to_string(), 1)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn exhausted_pool_is_service_unavailable() {
        let state = test_state();
        state.manager.initialize_template("abc").await.unwrap();
        state.manager.finalize_template("abc").await.unwrap();

        // Capacity is 2; drain it, then the next get times out.
        state.manager.get_test_database("abc").await.unwrap();
        state.manager.get_test_database("abc").await.unwrap();

        let resp = get_test_database(State(state), Path("abc".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn discard_then_get_is_not_found() {
        let state = test_state();
        state.manager.initialize_template("abc").await.unwrap();
        state.manager.finalize_template("abc").await.unwrap();
        let resp = discard_template(State(state.clone()), Path("abc".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = get_test_database(State(state), Path("abc".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
