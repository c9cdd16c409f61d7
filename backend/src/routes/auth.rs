use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::{authorization_header, AuthUser, GithubUser, OAuthError};
use crate::error::ApiError;
use crate::models::user::MeResponse;
use crate::AppState;

/// Provider label for OAuth logins in `llm_auth_requests_total`.
const GITHUB_PROVIDER: &str = "github";

#[derive(Serialize)]
struct AuthUrlResponse {
    auth_url: String,
}

#[derive(Deserialize)]
struct CallbackParams {
    code: String,
}

/// GET /api/auth/github - where to send the browser to log in
async fn github_login(State(state): State<Arc<AppState>>) -> Json<AuthUrlResponse> {
    Json(AuthUrlResponse {
        auth_url: state.github.authorize_url(),
    })
}

/// GET /api/auth/github/callback - exchange the code, issue a session token
/// and send the browser back to the frontend with it.
async fn github_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let github_user = match login(&state, &params.code).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "GitHub login failed");
            state.metrics.auth_outcome(GITHUB_PROVIDER, e.metric_status());
            return Err(e.into());
        }
    };

    let user: AuthUser = github_user.into();
    let token = state.gate.tokens().issue(&user).map_err(|e| {
        state.metrics.auth_outcome(GITHUB_PROVIDER, "error");
        ApiError::Internal(format!("Authentication failed: {}", e))
    })?;

    state.metrics.auth_outcome(GITHUB_PROVIDER, "success");
    tracing::info!(user = %user.username, "User logged in");

    let frontend = state.config.cors.frontend_url.trim_end_matches('/');
    Ok(Redirect::to(&format!(
        "{}/auth/callback?token={}",
        frontend, token
    )))
}

async fn login(state: &AppState, code: &str) -> Result<GithubUser, OAuthError> {
    let access_token = state.github.exchange_code(code).await?;
    state.github.fetch_user(&access_token).await
}

/// GET /api/auth/me - the caller and their current usage
async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state.gate.identify(authorization_header(&headers))?;
    let usage = state.ledger.peek_usage(&user.sub, Utc::now());

    Ok(Json(MeResponse {
        user: user.into(),
        usage,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/github", get(github_login))
        .route("/api/auth/github/callback", get(github_callback))
        .route("/api/auth/me", get(me))
        .with_state(state)
}
