//! HTTP transport for the video API
//!
//! [`VideoApi`] is the seam between the paging client and the network: the
//! production implementation talks HTTP through reqwest behind a governor
//! rate limiter, tests substitute a scripted fake.

use super::error::{ApiError, ApiResult};
use super::types::{ApiPage, ApiRequest};
use crate::error::Result;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// One external list call with an explicit credential
#[async_trait]
pub trait VideoApi: Send + Sync {
    async fn fetch(&self, key: &str, request: &ApiRequest) -> ApiResult<ApiPage>;
}

/// reqwest-backed [`VideoApi`]
pub struct HttpVideoApi {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Process-wide request rate ceiling
    rate_limiter: DefaultDirectRateLimiter,

    base_url: String,
}

impl HttpVideoApi {
    /// Create a client against [`DEFAULT_BASE_URL`]
    pub fn new(requests_per_second: u32, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, requests_per_second, timeout)
    }

    /// Create a client against a custom API root (mock servers, proxies)
    pub fn with_base_url(
        base_url: &str,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("playlist-harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl VideoApi for HttpVideoApi {
    #[instrument(skip(self, key), fields(operation = %request.operation()))]
    async fn fetch(&self, key: &str, request: &ApiRequest) -> ApiResult<ApiPage> {
        self.rate_limiter.until_ready().await;

        let (path, params) = request.to_query();
        let url = format!("{}/{path}", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .query(&params)
            .query(&[("key", key)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = body.len(),
            "API response"
        );

        if !status.is_success() {
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
