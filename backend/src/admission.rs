//! Admission control: token verification followed by the quota check.
//!
//! The gate never runs inference. It either hands back an [`InferenceTask`]
//! ready for the dispatcher or says why the request was turned away, and
//! records exactly one metric for whichever happened.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::{bearer_token, AuthError, AuthUser, TokenService};
use crate::inference::InferenceTask;
use crate::metrics::Metrics;
use crate::quota::{QuotaLedger, QuotaOutcome, RateLimited, UsageStats};

/// Provider label for session-token checks in `llm_auth_requests_total`.
pub const JWT_PROVIDER: &str = "jwt";

/// A request that passed authentication and quota.
#[derive(Debug)]
pub struct Admitted {
    pub user: AuthUser,
    pub usage: UsageStats,
    pub task: InferenceTask,
}

/// Why a request was turned away.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),
    #[error("Rate limit exceeded: {} requests per {}", .0.limit, .0.window.as_str())]
    RateLimited(RateLimited),
}

pub struct AdmissionGate {
    tokens: TokenService,
    ledger: Arc<QuotaLedger>,
    metrics: Arc<Metrics>,
    require_auth: bool,
}

impl AdmissionGate {
    pub fn new(
        tokens: TokenService,
        ledger: Arc<QuotaLedger>,
        metrics: Arc<Metrics>,
        require_auth: bool,
    ) -> Self {
        Self {
            tokens,
            ledger,
            metrics,
            require_auth,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Verify the caller and charge one request against their quota.
    pub fn admit(
        &self,
        auth_header: Option<&str>,
        prompt: String,
        max_tokens: u32,
        now: DateTime<Utc>,
    ) -> Result<Admitted, Rejection> {
        let user = self.identify(auth_header)?;

        match self.ledger.check_and_record(&user.sub, now) {
            QuotaOutcome::Allowed(usage) => {
                let task = InferenceTask {
                    identity: user.sub.clone(),
                    prompt,
                    max_tokens,
                };
                Ok(Admitted { user, usage, task })
            }
            QuotaOutcome::Limited(limited) => {
                self.metrics.rate_limit_hit(limited.window.as_str());
                tracing::info!(
                    identity = %user.sub,
                    window = limited.window.as_str(),
                    limit = limited.limit,
                    "Rate limit exceeded"
                );
                Err(Rejection::RateLimited(limited))
            }
        }
    }

    /// Verify the caller without touching the quota.
    pub fn identify(&self, auth_header: Option<&str>) -> Result<AuthUser, AuthError> {
        let result = match auth_header {
            None if !self.require_auth => {
                self.metrics.auth_outcome(JWT_PROVIDER, "anonymous");
                return Ok(AuthUser::anonymous());
            }
            None => Err(AuthError::MissingHeader),
            Some(header) => bearer_token(header).and_then(|token| self.tokens.verify(token)),
        };

        match &result {
            Ok(_) => self.metrics.auth_outcome(JWT_PROVIDER, "success"),
            Err(e) => {
                tracing::debug!(error = %e, "Authentication failed");
                self.metrics.auth_outcome(JWT_PROVIDER, e.metric_status());
            }
        }
        result
    }
}
