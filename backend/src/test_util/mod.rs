pub mod mock_ollama;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::auth::{AuthUser, SessionClaims, TokenService};
use crate::config::{
    AuthConfig, Config, CorsConfig, GithubConfig, InferenceConfig, LoggingConfig, MetricsConfig,
    RateLimitConfig, ServerConfig,
};
use crate::inference::{BackendError, BackendMode, InferenceBackend};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            jwt_expiration_hours: 24,
            require_auth: true,
        },
        github: GithubConfig {
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            ..GithubConfig::default()
        },
        cors: CorsConfig::default(),
        rate_limit: RateLimitConfig {
            per_minute: 10,
            per_day: 100,
            eviction_interval_secs: 0,
        },
        inference: InferenceConfig {
            pool_size: 2,
            ..InferenceConfig::default()
        },
        metrics: MetricsConfig { enabled: true },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

pub fn create_test_state(mode: BackendMode) -> Arc<AppState> {
    create_test_state_with(test_config(), mode)
}

pub fn create_test_state_with(config: Config, mode: BackendMode) -> Arc<AppState> {
    Arc::new(AppState::new(config, mode).expect("Failed to build test state"))
}

pub fn test_auth_user(sub: &str, username: &str) -> AuthUser {
    AuthUser {
        sub: sub.to_string(),
        username: username.to_string(),
        avatar_url: None,
    }
}

/// Session token for `sub`, signed with [`TEST_JWT_SECRET`].
pub fn generate_test_jwt(sub: &str, username: &str) -> String {
    TokenService::new(TEST_JWT_SECRET, 1)
        .issue(&test_auth_user(sub, username))
        .expect("Failed to encode JWT")
}

pub fn generate_expired_jwt(sub: &str) -> String {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: sub.to_string(),
        username: "expired".to_string(),
        avatar_url: None,
        exp: (now - Duration::hours(1)).timestamp() as u64,
        iat: (now - Duration::hours(2)).timestamp() as u64,
    };
    TokenService::new(TEST_JWT_SECRET, 1)
        .encode(&claims)
        .expect("Failed to encode JWT")
}

/// Backend that answers `echo: <prompt>` and counts its calls.
#[derive(Default)]
pub struct EchoBackend {
    calls: AtomicUsize,
}

impl EchoBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn infer(&self, prompt: &str, _max_tokens: u32) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("echo: {}", prompt))
    }
}

/// Backend whose every call fails.
pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn infer(&self, _prompt: &str, _max_tokens: u32) -> Result<String, BackendError> {
        Err(BackendError::Request("model crashed".to_string()))
    }
}
