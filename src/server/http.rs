use super::rpc;
use crate::dispatch::Dispatcher;
use crate::error::{CrewError, Result};
use crate::security::auth;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// HTTP transport: the JSON-RPC envelope behind `POST /mcp`, a public
/// `GET /health`, and an authenticated `GET /metrics` text exposition.
pub async fn run(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let config = dispatcher.context().current_config();
    let addr = format!("{}:{}", config.host, config.port);

    let app = Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/health", get(health_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(dispatcher);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CrewError::Config(format!("cannot bind {addr}: {e}")))?;
    info!(addr = %addr, "http transport ready");
    axum::serve(listener, app).await.map_err(CrewError::Io)?;
    Ok(())
}

fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

async fn mcp_endpoint(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let credential = credential_from_headers(&headers);
    match rpc::handle_frame(&dispatcher, credential.as_deref(), &body).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        // Notifications produce no response frame.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_endpoint(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    let ctx = dispatcher.context();
    let summary = ctx.health_snapshot();
    (
        StatusCode::OK,
        Json(json!({
            "status": summary.status,
            "uptime_secs": ctx.uptime_secs(),
        })),
    )
}

async fn metrics_endpoint(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ctx = dispatcher.context();
    let credential = credential_from_headers(&headers);
    let key = match auth::authenticate(&ctx.store, credential.as_deref()).await {
        Ok(key) => key,
        Err(_) => return (StatusCode::UNAUTHORIZED, String::new()).into_response(),
    };
    if !auth::any_permission_matches(&key.permissions, "get_metrics") {
        return (StatusCode::FORBIDDEN, String::new()).into_response();
    }
    let body = ctx.metrics.render(
        ctx.engine.active_count() as u64,
        ctx.engine.worker_slots_free() as u64,
    );
    (StatusCode::OK, body).into_response()
}
