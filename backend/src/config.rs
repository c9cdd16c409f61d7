//! Configuration for the gateway.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session token settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens.
    pub jwt_secret: String,
    /// Session token lifetime in hours (default: 24).
    #[serde(default = "default_jwt_expiration_hours")]
    pub jwt_expiration_hours: i64,
    /// Reject requests without a Bearer token. When false, such requests run
    /// under the shared `anonymous` identity.
    #[serde(default = "default_true")]
    pub require_auth: bool,
}

/// GitHub OAuth application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_github_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_github_token_url")]
    pub token_url: String,
    #[serde(default = "default_github_api_base_url")]
    pub api_base_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: default_github_authorize_url(),
            token_url: default_github_token_url(),
            api_base_url: default_github_api_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Frontend origin; also the target of the OAuth callback redirect.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
        }
    }
}

/// Per-identity quota settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_per_day")]
    pub per_day: u32,
    /// Interval of the idle-identity sweep in seconds. 0 disables it.
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_day: default_per_day(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

/// Inference backend and worker pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Number of inference worker threads (default: 2).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Answer generate requests with a canned echo instead of calling the model.
    #[serde(default)]
    pub test_mode: bool,
    /// Base URL of the Ollama-compatible model server.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    /// Upper bound accepted for `max_tokens` on generate requests.
    #[serde(default = "default_max_tokens_limit")]
    pub max_tokens_limit: u32,
    /// Timeout for a single call to the model server.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            test_mode: false,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            stop: default_stop(),
            max_tokens_limit: default_max_tokens_limit(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Mount the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}
fn default_jwt_expiration_hours() -> i64 {
    24
}
fn default_github_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}
fn default_github_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}
fn default_github_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_per_minute() -> u32 {
    10
}
fn default_per_day() -> u32 {
    100
}
fn default_eviction_interval() -> u64 {
    3600
}
fn default_pool_size() -> usize {
    2
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:1b".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_stop() -> Vec<String> {
    vec!["</s>".to_string(), "Human:".to_string(), "User:".to_string()]
}
fn default_max_tokens_limit() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Same as [`Config::load`] but reads the given file name (extension optional).
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("inference.stop")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
