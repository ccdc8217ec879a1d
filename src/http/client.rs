//! GET-only HTTP transport for data providers
//!
//! Every remote source the connectors talk to is read with plain GETs. The
//! client adds a base URL, a per-source rate limit and a bounded retry loop
//! that covers reading the body as well as the headers. Only 5xx responses
//! and transport timeouts, connect failures and broken bodies are retried;
//! 401/403 surface as authentication failures and any other 4xx (429
//! included) fails on the first response.

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::error::{is_retryable_status, Error, Result};
use crate::types::BackoffType;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times a failed GET is re-sent and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-sends after the first attempt (0 disables retrying)
    pub max_retries: u32,
    pub backoff: BackoffType,
    /// Delay before the first re-send
    pub initial: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffType::Exponential,
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-send number `attempt + 1`
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffType::Constant => self.initial,
            BackoffType::Linear => self.initial.saturating_mul(attempt.saturating_add(1)),
            BackoffType::Exponential => self.initial.saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max)
    }
}

/// Per-source client settings
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Prefix for relative request paths
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` sends as fast as the collector asks
    pub rate_limit: Option<RateLimiterConfig>,
    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            rate_limit: Some(RateLimiterConfig::default()),
            headers: BTreeMap::new(),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

impl HttpClientConfig {
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for [`HttpClientConfig`]
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Backoff curve between re-sends, capped at `max`
    pub fn backoff(mut self, backoff: BackoffType, initial: Duration, max: Duration) -> Self {
        self.config.retry.backoff = backoff;
        self.config.retry.initial = initial;
        self.config.retry.max = max;
        self
    }

    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit = None;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Query string and overrides for one GET
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Sent in key order, so request URLs are stable across runs
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Overrides the client's `max_retries`
    pub max_retries: Option<u32>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// A successful response, body fully read
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: StatusCode,
    pub body: Bytes,
}

/// What one send produced
enum Attempt {
    Success(Fetched),
    /// Worth re-sending while the policy allows it
    Transient(Error),
    Fatal(Error),
}

/// Rate-limited GET client; clones share the connection pool and the limiter
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<RateLimiter>,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Fails when the TLS backend or the user agent is unusable
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    pub async fn get(&self, url: &str) -> Result<Fetched> {
        self.send(url, &RequestConfig::default()).await
    }

    pub async fn get_with_config(&self, url: &str, config: RequestConfig) -> Result<Fetched> {
        self.send(url, &config).await
    }

    /// GET and return the status code with the whole body
    pub async fn get_bytes(&self, url: &str, config: RequestConfig) -> Result<(u16, Bytes)> {
        let fetched = self.send(url, &config).await?;
        Ok((fetched.status.as_u16(), fetched.body))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with_config(url, RequestConfig::default()).await
    }

    pub async fn get_json_with_config<T: DeserializeOwned>(
        &self,
        url: &str,
        config: RequestConfig,
    ) -> Result<T> {
        let fetched = self.send(url, &config).await?;
        Ok(serde_json::from_slice(&fetched.body)?)
    }

    async fn send(&self, url: &str, config: &RequestConfig) -> Result<Fetched> {
        let url = self.resolve(url);
        let policy = RetryPolicy {
            max_retries: config.max_retries.unwrap_or(self.config.retry.max_retries),
            ..self.config.retry
        };

        let mut attempt = 0;
        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.wait().await;
            }

            match self.attempt(&url, config).await {
                Attempt::Success(fetched) => {
                    debug!(url = %url, attempt, bytes = fetched.body.len(), "GET succeeded");
                    return Ok(fetched);
                }
                Attempt::Transient(e) if attempt < policy.max_retries => {
                    let delay = policy.delay(attempt);
                    warn!(
                        url = %url,
                        "GET failed ({e}), attempt {}/{}, retrying in {delay:?}",
                        attempt + 1,
                        policy.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Attempt::Transient(e) | Attempt::Fatal(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, url: &str, config: &RequestConfig) -> Attempt {
        let mut request = self
            .client
            .get(url)
            .timeout(config.timeout.unwrap_or(self.config.timeout));
        for (key, value) in self.config.headers.iter().chain(&config.headers) {
            request = request.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            request = request.query(&config.query);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        if status.is_success() || status.is_redirection() || status.is_informational() {
            // The body streams after the headers; a stall here is retried too
            return match response.bytes().await {
                Ok(body) => Attempt::Success(Fetched { status, body }),
                Err(e) => transport_failure(e),
            };
        }

        let body = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            Attempt::Fatal(Error::auth(host_of(url), body))
        } else if is_retryable_status(status.as_u16()) {
            Attempt::Transient(Error::http_status(status.as_u16(), body))
        } else {
            Attempt::Fatal(Error::http_status(status.as_u16(), body))
        }
    }

    /// Absolute URLs pass through; relative paths hang off the base URL
    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        match &self.config.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.config.base_url)
            .field("retry", &self.config.retry)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

fn transport_failure(e: reqwest::Error) -> Attempt {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        Attempt::Transient(e.into())
    } else {
        Attempt::Fatal(e.into())
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
