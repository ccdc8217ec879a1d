//! HTTP transport shared by the REST and archive connectors
//!
//! - 5xx, timeouts and connect errors are retried with backoff
//! - a governor token bucket caps each source's request rate

mod client;
mod rate_limit;

pub use client::{
    Fetched, HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig, RetryPolicy,
};
pub use rate_limit::{QuotaWindow, RateLimiter, RateLimiterConfig};
