use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{routing::post, Json, Router};
use chrono::Utc;

use crate::auth::authorization_header;
use crate::error::ApiError;
use crate::models::llm::{round_seconds, GenerateRequest, GenerateResponse};
use crate::AppState;

/// POST /api/llm/generate - admit, queue and wait for one generation
async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let limit = state.config.inference.max_tokens_limit;
    if request.max_tokens == 0 || request.max_tokens > limit {
        return Err(ApiError::InvalidRequest(format!(
            "max_tokens must be between 1 and {}",
            limit
        )));
    }

    let admitted = state.gate.admit(
        authorization_header(&headers),
        request.prompt,
        request.max_tokens,
        Utc::now(),
    )?;
    let username = admitted.user.username.clone();

    let output = state.dispatcher.submit(admitted.task).await?;
    tracing::info!(
        user = %username,
        tokens = output.tokens,
        "Generated response"
    );

    Ok(Json(GenerateResponse {
        response: output.text,
        usage: admitted.usage,
        inference_time_seconds: output
            .inference_time
            .map(|elapsed| round_seconds(elapsed.as_secs_f64())),
        user: state.dispatcher.test_mode().then_some(username),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/llm/generate", post(generate))
        .with_state(state)
}
