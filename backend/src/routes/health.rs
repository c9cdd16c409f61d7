use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    test_mode: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.dispatcher.model_loaded(),
        test_mode: state.dispatcher.test_mode(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state.dispatcher.refresh_gauges();
    state.metrics.refresh_system();
    state
        .metrics
        .tracked_identities
        .set(state.ledger.tracked_identities() as i64);

    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn info() -> Json<Value> {
    Json(json!({
        "name": "Mini LLM API with GitHub OAuth",
        "version": env!("CARGO_PKG_VERSION"),
        "auth": "GitHub OAuth 2.0",
        "endpoints": {
            "auth": "/api/auth/github",
            "generate": "/api/llm/generate (requires auth)",
            "user_info": "/api/auth/me (requires auth)",
            "health": "/health",
            "metrics": "/metrics"
        }
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(info))
        .route("/health", get(health));
    if state.config.metrics.enabled {
        router = router.route("/metrics", get(metrics));
    }
    router.with_state(state)
}
