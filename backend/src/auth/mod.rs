//! Authentication: GitHub OAuth login and signed session tokens.

pub mod github;
mod token;

pub use github::{GithubClient, GithubUser, OAuthError};
pub use token::{SessionClaims, TokenService};

use axum::http::HeaderMap;

/// Authenticated caller extracted from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Provider user id; used as the quota identity.
    pub sub: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl AuthUser {
    /// Identity used when authentication is optional and no token was sent.
    pub fn anonymous() -> Self {
        Self {
            sub: "anonymous".to_string(),
            username: "anonymous".to_string(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,
    #[error("Invalid authorization header format")]
    InvalidFormat,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Label for the auth outcome metric.
    pub fn metric_status(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing",
            AuthError::InvalidFormat => "malformed",
            AuthError::Expired => "expired",
            AuthError::InvalidToken(_) => "invalid",
        }
    }
}

/// Raw `Authorization` header value, if present.
///
/// A value with non-visible-ASCII bytes comes back empty, so it is still
/// seen as present and fails [`bearer_token`] as malformed.
pub fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or(""))
}

/// Extract the token from a `Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_valid() {
        assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_basic_auth_rejected() {
        assert!(matches!(
            bearer_token("Basic dXNlcjpwYXNz"),
            Err(AuthError::InvalidFormat)
        ));
    }

    #[test]
    fn test_bearer_token_empty_rejected() {
        assert!(matches!(bearer_token("Bearer "), Err(AuthError::InvalidFormat)));
        assert!(matches!(bearer_token("Bearer    "), Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_bearer_prefix_is_case_sensitive() {
        assert!(bearer_token("bearer abc").is_err());
    }

    #[test]
    fn test_authorization_header_missing() {
        assert!(authorization_header(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_authorization_header_present() {
        let headers = headers_with_auth("Bearer token");
        assert_eq!(authorization_header(&headers), Some("Bearer token"));
    }

    #[test]
    fn test_authorization_header_unreadable_is_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            axum::http::HeaderValue::from_bytes(b"Bearer \xff").unwrap(),
        );
        let raw = authorization_header(&headers).unwrap();
        assert!(matches!(bearer_token(raw), Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_metric_status_labels() {
        assert_eq!(AuthError::MissingHeader.metric_status(), "missing");
        assert_eq!(AuthError::InvalidFormat.metric_status(), "malformed");
        assert_eq!(AuthError::Expired.metric_status(), "expired");
        assert_eq!(AuthError::InvalidToken("x".into()).metric_status(), "invalid");
    }

    #[test]
    fn test_auth_error_messages() {
        assert_eq!(AuthError::MissingHeader.to_string(), "Missing authorization header");
        assert_eq!(
            AuthError::InvalidFormat.to_string(),
            "Invalid authorization header format"
        );
        assert!(AuthError::InvalidToken("bad signature".into())
            .to_string()
            .contains("bad signature"));
    }
}
