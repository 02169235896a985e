use crate::config::ScraperConfig;
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Statuses worth another attempt: rate limiting and transient server errors.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request error: {0}")]
    Request(String),

    /// Client-side failure unrelated to the network (bad URL, bad header, ...).
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Transport-level transient failures, retried inside [`HttpClient`].
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) => true,
            FetchError::Status { status, .. } => is_retryable_status(*status),
            FetchError::Request(_) | FetchError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if e.is_builder() {
            FetchError::Other(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Fetches one page body. Seam for swapping the network out in tests.
#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

/// `retry_delay * 1, retry_delay * 2, ..., retry_delay * max_retries`
pub fn linear_backoff(retry_delay: Duration, max_retries: u32) -> impl Iterator<Item = Duration> {
    (1..=max_retries).map(move |attempt| retry_delay * attempt)
}

pub struct HttpClient {
    inner: reqwest::Client,
    user_agents: Vec<HeaderValue>,
    extra_headers: HeaderMap,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        let user_agents = config
            .user_agents
            .iter()
            .map(|ua| HeaderValue::from_str(ua).with_context(|| format!("Invalid user agent {:?}", ua)))
            .collect::<Result<Vec<_>>>()?;
        ensure!(!user_agents.is_empty(), "At least one user agent is required");

        Ok(Self {
            inner,
            user_agents,
            extra_headers: build_header_map(&config.headers)?,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    /// Configured headers plus a user agent drawn at random from the pool.
    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.extra_headers.clone();
        let idx = rand::random_range(0..self.user_agents.len());
        headers.insert(USER_AGENT, self.user_agents[idx].clone());
        headers
    }

    async fn send_once(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .inner
            .get(url)
            .headers(self.request_headers())
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PageClient for HttpClient {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let client = self;
        let mut attempt = 0u32;
        RetryIf::spawn(
            linear_backoff(self.retry_delay, self.max_retries),
            move || {
                attempt += 1;
                debug!("GET {} (transport attempt {})", url, attempt);
                client.send_once(url)
            },
            |e: &FetchError| {
                let transient = e.is_transient();
                if transient {
                    warn!("Transient failure for {}: {}", url, e);
                }
                transient
            },
        )
        .await
    }
}

fn build_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name {:?}", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {:?}", name))?;
        map.insert(name, value);
    }
    Ok(map)
}
