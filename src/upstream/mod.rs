//! Outbound balance lookups against the Virtusim API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Public balance endpoint.
pub const DEFAULT_BASE_URL: &str = "https://virtusim.com/api/v2/json.php";

/// Default bound on a single upstream call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Why an upstream balance lookup failed.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Virtusim returned {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("request to Virtusim timed out")]
    Timeout,

    #[error("request to Virtusim failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("invalid JSON from Virtusim: {0}")]
    Decode(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

/// A decoded upstream balance response.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub payload: Value,
    /// Time from sending the request until the response headers arrived.
    pub response_time: Duration,
}

/// Something that can answer a balance query for an API key.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch_balance(&self, api_key: &str) -> Result<Balance, UpstreamError>;
}

/// Settings for [`VirtusimClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// `None` leaves the call unbounded.
    pub timeout: Option<Duration>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// [`BalanceSource`] backed by the Virtusim JSON API.
#[derive(Clone)]
pub struct VirtusimClient {
    base_url: String,
    client: reqwest::Client,
}

impl VirtusimClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut builder = reqwest::Client::builder().default_headers(browser_headers());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(UpstreamError::Client)?;
        Ok(Self {
            base_url: config.base_url,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://virtusim.com"));
    headers.insert(REFERER, HeaderValue::from_static("https://virtusim.com/"));
    headers
}

#[async_trait]
impl BalanceSource for VirtusimClient {
    async fn fetch_balance(&self, api_key: &str) -> Result<Balance, UpstreamError> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("api_key", api_key), ("action", "balance")])
            .send()
            .await?;
        let response_time = start.elapsed();

        let status = response.status();
        debug!(status = status.as_u16(), elapsed = ?response_time, "upstream responded");

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = response.bytes().await?;
        let payload =
            serde_json::from_slice(&body).map_err(|err| UpstreamError::Decode(err.to_string()))?;
        Ok(Balance {
            payload,
            response_time,
        })
    }
}
