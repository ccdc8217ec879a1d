//! Per-source request quotas
//!
//! Providers cap requests per key: the Census API per second, Alpha
//! Vantage's free tier per minute. Each source's client gets one governor
//! token bucket, shared by every period the collector has in flight.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Window a quota is counted over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    #[default]
    Second,
    Minute,
}

/// `requests` per `per`, with bursts up to `burst` (defaults to `requests`)
///
/// ```yaml
/// rate_limit:
///   requests: 5
///   per: minute
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default)]
    pub per: QuotaWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

fn default_requests() -> u32 {
    10
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(default_requests())
    }
}

impl RateLimiterConfig {
    pub fn per_second(requests: u32) -> Self {
        Self {
            requests,
            per: QuotaWindow::Second,
            burst: None,
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            per: QuotaWindow::Minute,
            burst: None,
        }
    }

    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Zero counts are clamped to one
    fn quota(&self) -> Quota {
        let requests = NonZeroU32::new(self.requests).unwrap_or(NonZeroU32::MIN);
        let burst = self
            .burst
            .and_then(NonZeroU32::new)
            .unwrap_or(requests);
        let quota = match self.per {
            QuotaWindow::Second => Quota::per_second(requests),
            QuotaWindow::Minute => Quota::per_minute(requests),
        };
        quota.allow_burst(burst)
    }
}

/// Token bucket shared by clones of one HTTP client
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            bucket: Arc::new(Governor::direct(config.quota())),
        }
    }

    /// Wait for a token
    pub async fn wait(&self) {
        self.bucket.until_ready().await;
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.bucket.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
