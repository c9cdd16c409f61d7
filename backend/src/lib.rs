pub mod admission;
pub mod auth;
pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod quota;
pub mod routes;
pub mod test_util;

pub use admission::{AdmissionGate, Admitted, Rejection};
pub use auth::{AuthUser, GithubClient, TokenService};
pub use config::Config;
pub use error::ApiError;
pub use inference::{BackendMode, InferenceBackend, InferenceDispatcher, OllamaBackend};
pub use metrics::Metrics;
pub use quota::{QuotaLedger, QuotaLimits, UsageStats};

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Errors while assembling the application state.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Pool(#[from] inference::PoolError),
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub github: GithubClient,
    /// Token verification and quota admission.
    pub gate: AdmissionGate,
    pub ledger: Arc<QuotaLedger>,
    pub dispatcher: InferenceDispatcher,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire every component from `config`, running inference on `mode`.
    pub fn new(config: Config, mode: BackendMode) -> Result<Self, StartupError> {
        let metrics = Arc::new(Metrics::new()?);
        let ledger = Arc::new(QuotaLedger::new(QuotaLimits {
            per_minute: config.rate_limit.per_minute,
            per_day: config.rate_limit.per_day,
        }));
        let gate = AdmissionGate::new(
            TokenService::new(&config.auth.jwt_secret, config.auth.jwt_expiration_hours),
            Arc::clone(&ledger),
            Arc::clone(&metrics),
            config.auth.require_auth,
        );
        let dispatcher =
            InferenceDispatcher::new(mode, config.inference.pool_size, Arc::clone(&metrics))?;

        Ok(Self {
            github: GithubClient::new(config.github.clone()),
            config,
            gate,
            ledger,
            dispatcher,
            metrics,
        })
    }

    /// Start the idle-identity sweep unless `rate_limit.eviction_interval_secs` is 0.
    pub fn spawn_quota_eviction(&self) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.config.rate_limit.eviction_interval_secs;
        if interval == 0 {
            return None;
        }
        Some(Arc::clone(&self.ledger).spawn_eviction(
            Duration::from_secs(interval),
            Arc::clone(&self.metrics),
        ))
    }
}

/// Origin of the local development frontend, always allowed by CORS.
pub const DEV_FRONTEND_ORIGIN: &str = "http://localhost:3000";

/// Build the full HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in [state.config.cors.frontend_url.as_str(), DEV_FRONTEND_ORIGIN] {
        match origin.trim_end_matches('/').parse::<HeaderValue>() {
            Ok(value) if !origins.contains(&value) => origins.push(value),
            Ok(_) => {}
            Err(_) => tracing::warn!("Ignoring invalid CORS origin {:?}", origin),
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::auth::router(state.clone()))
        .merge(routes::llm::router(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state,
            logging::request_logger,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
