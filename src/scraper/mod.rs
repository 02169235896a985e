pub mod cleaner;
pub mod failed_html;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{CardKey, ErrorKind, ScrapeError, ScrapeOutcome};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use self::http_client::{FetchError, HttpClient, PageClient, is_retryable_status};
use self::parsers::{PageError, parse_price_page};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable price source: URL construction plus one classified fetch per card.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn card_url(&self, key: &CardKey) -> String;

    /// Never fails outright: every problem becomes a classified [`ScrapeError`].
    async fn fetch_prices(&self, url: &str) -> ScrapeOutcome;
}

// ── pricecharting scraper ─────────────────────────────────────────────────────

pub struct PriceChartingScraper<C = HttpClient> {
    client: C,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    failed_html_dir: Option<PathBuf>,
}

impl PriceChartingScraper<HttpClient> {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self::with_client(HttpClient::new(config)?, config))
    }
}

impl<C: PageClient> PriceChartingScraper<C> {
    pub fn with_client(client: C, config: &ScraperConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            failed_html_dir: config
                .save_failed_html
                .then(|| config.debug_output_folder.clone()),
        }
    }

    fn extract(&self, url: &str, html: &str) -> ScrapeOutcome {
        parse_price_page(html).map_err(|e| {
            if e == PageError::MissingTable {
                self.keep_failed_html(url, html);
            }
            ScrapeError::from(e)
        })
    }

    fn keep_failed_html(&self, url: &str, html: &str) {
        let Some(dir) = &self.failed_html_dir else { return };
        match failed_html::save(dir, url, html) {
            Ok(path) => info!("  Saved failed HTML to {:?}", path),
            Err(e) => warn!("  Could not save debug HTML: {:#}", e),
        }
    }
}

#[async_trait]
impl<C: PageClient> PriceSource for PriceChartingScraper<C> {
    fn card_url(&self, key: &CardKey) -> String {
        cleaner::card_url(&self.base_url, &key.set, &key.card_name, &key.card_number)
    }

    async fn fetch_prices(&self, url: &str) -> ScrapeOutcome {
        let mut attempt = 1u32;

        loop {
            debug!("Fetching {} (attempt {}/{})", url, attempt, self.max_retries);

            let err = match self.client.get_text(url).await {
                Ok(html) => return self.extract(url, &html),
                Err(e) => e,
            };

            let retryable = match &err {
                FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Request(_) => true,
                FetchError::Status { status, .. } => is_retryable_status(*status),
                FetchError::Other(_) => false,
            };

            if !retryable || attempt >= self.max_retries {
                return Err(classify(&err, attempt));
            }

            let delay = self.retry_delay * attempt;
            warn!(
                "  {} (attempt {}/{}), retrying in {:.1?}",
                err, attempt, self.max_retries, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Final classification of a transport failure after `attempts` tries.
fn classify(err: &FetchError, attempts: u32) -> ScrapeError {
    match err {
        FetchError::Timeout(_) => ScrapeError::new(
            ErrorKind::RequestTimeout,
            format!("Request timed out after {} attempts", attempts),
        ),
        FetchError::Connect(e) => ScrapeError::new(ErrorKind::ConnectionError, format!("Failed to connect: {}", e)),
        FetchError::Status { status, url } => {
            ScrapeError::new(ErrorKind::HttpError, format!("HTTP {}: {}", status, url))
        }
        FetchError::Request(e) => ScrapeError::new(ErrorKind::RequestFailed, format!("Request error: {}", e)),
        FetchError::Other(e) => ScrapeError::new(ErrorKind::UnknownError, format!("Unexpected error: {}", e)),
    }
}
