//! GitHub OAuth code exchange and profile lookup.

use reqwest::Client;
use serde::Deserialize;

use crate::config::GithubConfig;

use super::AuthUser;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Failed to exchange code for token")]
    ExchangeFailed,
    #[error("{0}")]
    Provider(String),
    #[error("Failed to get access token")]
    MissingAccessToken,
    #[error("Failed to get GitHub user info")]
    ProfileFailed,
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
}

impl OAuthError {
    /// Whether GitHub answered and refused, as opposed to the call itself failing.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, OAuthError::RequestFailed(_))
    }

    /// Label for the auth outcome metric.
    pub fn metric_status(&self) -> &'static str {
        if self.is_rejection() {
            "failed"
        } else {
            "error"
        }
    }
}

/// Access-token response. GitHub reports errors with a 200 and an `error` field.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Subset of the GitHub user profile.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<GithubUser> for AuthUser {
    fn from(user: GithubUser) -> Self {
        AuthUser {
            sub: user.id.to_string(),
            username: user.login,
            avatar_url: user.avatar_url,
        }
    }
}

/// Client for the GitHub OAuth web flow.
pub struct GithubClient {
    http_client: Client,
    config: GithubConfig,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Self {
        Self {
            http_client: Client::new(),
            config,
        }
    }

    /// URL the browser is sent to for consent.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&scope=read:user%20user:email",
            self.config.authorize_url, self.config.client_id
        )
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "GitHub token exchange failed");
            return Err(OAuthError::ExchangeFailed);
        }

        let body: TokenResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(OAuthError::Provider(
                body.error_description.unwrap_or(error),
            ));
        }

        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or(OAuthError::MissingAccessToken)
    }

    /// Fetch the profile of the user owning `access_token`.
    pub async fn fetch_user(&self, access_token: &str) -> Result<GithubUser, OAuthError> {
        let url = format!("{}/user", self.config.api_base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "mini-llm-backend")
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "GitHub user lookup failed");
            return Err(OAuthError::ProfileFailed);
        }

        Ok(response.json().await?)
    }
}
