//! Per-tenant fixed-window request budget.

use crate::config::RateLimitConfig;
use crate::error::{ApiError, ApiResult};
use canon_types::TenantId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: DashMap<TenantId, Window>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            windows: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Count one request for `tenant`, or refuse it until the window rolls.
    pub fn check(&self, tenant: &TenantId) -> ApiResult<()> {
        self.check_at(tenant, Instant::now())
    }

    fn check_at(&self, tenant: &TenantId, now: Instant) -> ApiResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut entry = self.windows.entry(tenant.clone()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let remaining = self.window.saturating_sub(elapsed);
            tracing::warn!(tenant = %tenant, limit = self.max_requests, "Rate limit exceeded");
            return Err(ApiError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        entry.count += 1;
        Ok(())
    }
}
