//! HTTP error mapping for the gateway routes.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::admission::Rejection;
use crate::auth::{AuthError, OAuthError};
use crate::inference::DispatchError;
use crate::quota::RateLimited;

/// Errors returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Rate limit exceeded: {} requests per {}", .0.limit, .0.window.as_str())]
    RateLimited(RateLimited),

    #[error("Model not loaded")]
    BackendUnavailable,

    #[error("Generation failed: {0}")]
    Inference(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    OAuth(OAuthError),

    #[error("{0}")]
    Internal(String),
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Unauthenticated(e) => ApiError::Unauthenticated(e),
            Rejection::RateLimited(limited) => ApiError::RateLimited(limited),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        if e.is_rejection() {
            ApiError::OAuth(e)
        } else {
            ApiError::Internal(format!("Authentication failed: {}", e))
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::BackendUnavailable => ApiError::BackendUnavailable,
            DispatchError::Inference(message) => ApiError::Inference(message),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::OAuth(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::RateLimited(limited) = &self {
            let retry_after = limited.retry_after.as_secs();
            let body = Json(json!({
                "error": self.to_string(),
                "limit_type": limited.window.as_str(),
                "limit": limited.limit,
                "retry_after_seconds": retry_after,
            }));
            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after));
            return response;
        }

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::LimitWindow;
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_body_and_header() {
        let response = ApiError::RateLimited(RateLimited {
            window: LimitWindow::Minute,
            limit: 2,
            retry_after: Duration::from_secs(60),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");

        let body = body_json(response).await;
        assert_eq!(body["limit_type"], "minute");
        assert_eq!(body["limit"], 2);
        assert_eq!(body["retry_after_seconds"], 60);
        assert_eq!(body["error"], "Rate limit exceeded: 2 requests per minute");
    }

    #[tokio::test]
    async fn test_unavailable_is_503() {
        let response = ApiError::from(DispatchError::BackendUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "Model not loaded");
    }

    #[tokio::test]
    async fn test_inference_error_message() {
        let response =
            ApiError::from(DispatchError::Inference("timeout".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Generation failed: timeout");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(AuthError::MissingHeader).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OAuthError::ExchangeFailed).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OAuthError::MissingAccessToken).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
