//! Application state for API handlers

use crate::auth::Authenticator;
use crate::error::ApiResult;
use crate::rate_limit::RateLimiter;
use axum::http::HeaderMap;
use canon_service::{Caller, DecisionService};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Decision engine
    pub service: Arc<DecisionService>,

    pub auth: Arc<Authenticator>,

    pub limiter: Arc<RateLimiter>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        service: Arc<DecisionService>,
        auth: Arc<Authenticator>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            service,
            auth,
            limiter,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Authenticate the request for `scope` and charge its tenant's budget.
    pub fn authorize(&self, headers: &HeaderMap, scope: &str) -> ApiResult<Caller> {
        let caller = self.auth.authenticate(headers, scope)?;
        self.limiter.check(&caller.tenant_id)?;
        Ok(caller)
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
