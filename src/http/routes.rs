use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use super::errors::AppError;
use crate::auth::{bearer_token, TokenError};
use crate::core::AppState;
use crate::logging::LogConfig;
use crate::realtime::RealtimeStats;
use crate::ws;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let prefix = state.config.server.api_prefix.trim_end_matches('/').to_string();
    let log_config = Arc::new(state.config.log.clone());

    let api = Router::new()
        .route("/ws/chat", get(ws::chat_socket))
        .route("/ws/connections", get(connections));

    let app = Router::new().route("/health", get(health));
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };

    app.layer(middleware::from_fn_with_state(log_config, log_requests))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Realtime connection statistics, admin only.
async fn connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RealtimeStats>, AppError> {
    let token = bearer_token(&headers).ok_or(TokenError::Missing)?;
    let user_id = state.keys.verify_access(token)?;
    let user = state
        .store
        .find_active_user(user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found or inactive"))?;
    if !user.is_admin() {
        return Err(AppError::forbidden("Admin access required"));
    }
    Ok(Json(state.hub.stats()))
}

async fn log_requests(
    State(config): State<Arc<LogConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !config.log_requests || config.should_skip_path(&path) {
        return next.run(request).await;
    }

    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let start = Instant::now();
    tracing::info!(request_id = %request_id, method = %method, path = %path, "Incoming request");

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Request completed"
    );
    response
}
