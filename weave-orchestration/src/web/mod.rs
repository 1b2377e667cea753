//! # Web Layer
//!
//! Router assembly, shared application state, the API error mapping, and
//! the health endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use weave_shared::{SystemContext, WeaveError};

use crate::registry::SessionRegistry;

/// Budget for the health endpoint's database probe
const HEALTH_DB_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub context: SystemContext,
    pub registry: Arc<SessionRegistry>,
    /// Fires on graceful shutdown; sessions derive child tokens from it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(context: SystemContext, shutdown: CancellationToken) -> Self {
        Self {
            context,
            registry: Arc::new(SessionRegistry::new()),
            shutdown,
        }
    }
}

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ws", get(crate::ws::ws_handler))
        .route(
            "/v1/tasks/{task_id}/execute",
            post(crate::streaming::execute_task),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP-facing error with a JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<WeaveError> for ApiError {
    fn from(err: WeaveError) -> Self {
        match &err {
            WeaveError::Validation(message) => Self::bad_request(message.clone()),
            WeaveError::NotFound { .. } => Self::not_found(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

/// Process health: database reachability and bus traffic counters
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = matches!(
        tokio::time::timeout(HEALTH_DB_TIMEOUT, state.context.gateway().health_check()).await,
        Ok(true)
    );
    let bus = state.context.bus().metrics().snapshot();

    let status = if database_ok { "ok" } else { "degraded" };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "database": database_ok,
            "bus": bus,
            "sessions": {
                "connections": state.registry.connection_count(),
                "users": state.registry.user_count(),
            },
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weave_error_mapping() {
        let err: ApiError = WeaveError::Validation("bad input".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = WeaveError::not_found("task", uuid::Uuid::nil()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = WeaveError::Database("down".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
