//! Pipeline orchestrator: ties catalogs → scraper → storage together.
//!
//! ## Run
//!
//!   1. Resolve the input to catalog files (one set per file). Nothing is
//!      fetched if the input is missing or holds no catalogs.
//!   2. Read the existing dataset once.
//!   3. For each set, in order, for each card, in order: reuse the stored row
//!      if it is still fresh, otherwise fetch, then pause before the next card.
//!   4. Merge every produced row into the dataset and rewrite it once.
//!
//! Strictly sequential: at most one request in flight, with a rate-limit
//! pause after every fetched card except the last of a set.

pub mod freshness;

use crate::config::{AppConfig, RateLimitConfig};
use crate::loader::{discover_catalogs, load_catalog, set_name_from_path};
use crate::models::{CardRecord, PriceRow, PriceSnapshot};
use crate::scraper::{PriceChartingScraper, PriceSource};
use crate::storage::{Dataset, save_merged};
use crate::utils;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{debug, error, info, warn};

use self::freshness::FreshnessPolicy;

pub struct Pipeline<S> {
    source: S,
    freshness: FreshnessPolicy,
    rate_limit: RateLimitConfig,
}

impl Pipeline<PriceChartingScraper> {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let scraper = PriceChartingScraper::new(&config.scraping).context("Failed to build scraper")?;
        Ok(Self::new(scraper, config))
    }
}

impl<S: PriceSource> Pipeline<S> {
    pub fn new(source: S, config: &AppConfig) -> Self {
        Self {
            source,
            freshness: FreshnessPolicy::new(&config.scraping.incremental),
            rate_limit: config.scraping.rate_limit.clone(),
        }
    }

    pub async fn run(&self, input: &Path, output: &Path) -> Result<RunStats> {
        let catalogs = discover_catalogs(input)?;
        info!("Found {} set(s) to process", catalogs.len());
        for path in &catalogs {
            debug!("  - {:?}", path);
        }

        // Shared by every card in this run
        let batch_start_time = utils::now();

        let existing = Dataset::load(output)
            .with_context(|| format!("Existing dataset {:?} is unreadable; not overwriting it", output))?;
        if self.freshness.is_enabled() {
            info!("Incremental mode: {} stored rows considered", existing.len());
        }

        let mut stats = RunStats::default();
        let mut fresh_rows = Vec::new();

        for path in &catalogs {
            let Some(set_name) = set_name_from_path(path) else {
                warn!("Skipping {:?}: no set name in filename", path);
                stats.catalog_errors += 1;
                continue;
            };

            let cards = match load_catalog(path) {
                Ok(cards) => cards,
                Err(e) => {
                    error!("Error reading file {:?}: {:#}", path, e);
                    stats.catalog_errors += 1;
                    continue;
                }
            };

            let outcome = self
                .process_set(&set_name, &cards, batch_start_time, &existing)
                .await;
            stats.sets += 1;
            stats.scraped += outcome.scraped;
            stats.skipped += outcome.skipped;
            stats.succeeded += outcome.succeeded;
            stats.failed += outcome.failed;
            fresh_rows.extend(outcome.rows);
        }

        info!(
            "Processed {} set(s), {} unreadable catalog(s)",
            stats.sets, stats.catalog_errors
        );

        stats.rows_written = save_merged(output, existing, fresh_rows)?;
        match stats.rows_written {
            Some(n) => {
                info!("Results saved to {:?}", output);
                if stats.scraped > 0 {
                    info!(
                        "Scraped: {} cards ({} successful, {} failed)",
                        stats.scraped, stats.succeeded, stats.failed
                    );
                }
                if stats.skipped > 0 {
                    info!("Skipped: {} cards (fresh data)", stats.skipped);
                }
                info!("Total cards in file: {}", n);
            }
            None => info!("No results to save"),
        }

        Ok(stats)
    }

    /// Run one set's cards through the freshness check and the source.
    pub async fn process_set(
        &self,
        set_name: &str,
        cards: &[CardRecord],
        batch_start_time: NaiveDateTime,
        existing: &Dataset,
    ) -> SetOutcome {
        let total = cards.len();
        info!("=== Processing set: {} ({} cards) ===", set_name, total);

        let mut out = SetOutcome::default();

        for (i, card) in cards.iter().enumerate() {
            let idx = i + 1;
            let key = card.key(set_name);
            info!("[{}/{}] {} #{}", idx, total, card.card_name, card.card_number);

            let decision = self.freshness.decide(&key, existing, utils::now());
            if !decision.should_scrape {
                info!("  ⏭  Skipping: {}", decision.reason);
                if let Some(row) = existing.get(&key) {
                    out.rows.push(row.clone());
                }
                out.skipped += 1;
                continue;
            }

            let url = self.source.card_url(&key);
            info!("  🔍 Scraping: {}", decision.reason);
            debug!("  URL: {}", url);

            let scraped_at = utils::now();
            let outcome = self.source.fetch_prices(&url).await;
            match &outcome {
                Ok(prices) => {
                    let names: Vec<&str> = prices.keys().map(String::as_str).collect();
                    info!("  ✓ Found {} price(s): {}", prices.len(), names.join(", "));
                    out.succeeded += 1;
                }
                Err(e) => {
                    warn!("  ✗ {}", e);
                    out.failed += 1;
                }
            }
            out.scraped += 1;
            out.rows.push(PriceRow::from(PriceSnapshot {
                key,
                url,
                batch_start_time,
                scraped_at,
                outcome,
            }));

            if idx < total {
                let delay = self.rate_limit.next_delay();
                debug!("  ⏱ Waiting {:.2?} before next request", delay);
                tokio::time::sleep(delay).await;
            }
        }

        out
    }
}

/// Rows and counters produced by one set.
#[derive(Debug, Default)]
pub struct SetOutcome {
    pub rows: Vec<PriceRow>,
    pub scraped: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default, PartialEq)]
pub struct RunStats {
    pub sets: usize,
    pub catalog_errors: usize,
    pub scraped: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_written: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IncrementalConfig;
    use crate::models::{CardKey, ErrorKind, Prices, ScrapeError, ScrapeOutcome};
    use crate::utils::format_timestamp;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Prices every card at "$1.00" unless its URL is listed as failing.
    #[derive(Default)]
    struct FakeSource {
        failing: Vec<String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn failing(urls: &[&str]) -> Self {
            Self {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        fn card_url(&self, key: &CardKey) -> String {
            format!("fake://{}/{}-{}", key.set, key.card_name, key.card_number)
        }

        async fn fetch_prices(&self, url: &str) -> ScrapeOutcome {
            self.requested.lock().unwrap().push(url.to_string());
            if self.failing.iter().any(|u| u == url) {
                return Err(ScrapeError::new(ErrorKind::NotFound, "missing"));
            }
            Ok(Prices::from([("ungraded".to_string(), "$1.00".to_string())]))
        }
    }

    fn config(incremental: bool) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.scraping.rate_limit = RateLimitConfig {
            delay_min: 0.0,
            delay_max: 0.0,
            use_random: false,
        };
        cfg.scraping.incremental = IncrementalConfig {
            enabled: incremental,
            max_age_days: 7.0,
        };
        cfg
    }

    fn card(name: &str, number: &str) -> CardRecord {
        CardRecord {
            card_name: name.into(),
            card_number: number.into(),
        }
    }

    fn stored(set: &str, name: &str, number: &str, age_days: i64, price: &str) -> PriceRow {
        PriceRow {
            key: card(name, number).key(set),
            scraped_at: Some(format_timestamp(&(utils::now() - Duration::days(age_days)))),
            values: BTreeMap::from([("ungraded".to_string(), price.to_string())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_process_set_reuses_fresh_rows() {
        let pipeline = Pipeline::new(FakeSource::failing(&["fake://base/Mew-8"]), &config(true));
        let fresh = stored("base", "Pikachu", "58", 1, "$9.99");
        let existing = Dataset::from_rows(vec![fresh.clone(), stored("base", "Raichu", "14", 30, "$2.00")]);
        let cards = vec![card("Pikachu", "58"), card("Raichu", "14"), card("Mew", "8")];

        let out = pipeline
            .process_set("base", &cards, utils::now(), &existing)
            .await;

        assert_eq!(out.skipped, 1);
        assert_eq!(out.scraped, 2);
        assert_eq!(out.succeeded, 1);
        assert_eq!(out.failed, 1);
        assert_eq!(
            pipeline.source.requested(),
            vec!["fake://base/Raichu-14", "fake://base/Mew-8"]
        );

        assert_eq!(out.rows[0], fresh);
        assert_eq!(out.rows[1].value("ungraded"), Some("$1.00"));
        assert_eq!(out.rows[1].url.as_deref(), Some("fake://base/Raichu-14"));
        assert!(out.rows[2].is_failed());
        assert_eq!(out.rows[2].error_type.as_deref(), Some("not_found"));
        assert_eq!(out.rows[1].batch_start_time, out.rows[2].batch_start_time);
    }

    #[tokio::test]
    async fn test_process_set_without_incremental_fetches_everything() {
        let pipeline = Pipeline::new(FakeSource::default(), &config(false));
        let existing = Dataset::from_rows(vec![stored("base", "Pikachu", "58", 0, "$9.99")]);

        let out = pipeline
            .process_set("base", &[card("Pikachu", "58")], utils::now(), &existing)
            .await;

        assert_eq!(out.scraped, 1);
        assert_eq!(out.skipped, 0);
        assert_eq!(out.rows[0].value("ungraded"), Some("$1.00"));
    }

    fn write(path: &Path, body: &str) -> PathBuf {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
        path.to_path_buf()
    }

    #[tokio::test]
    async fn test_run_merges_with_existing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let cards = dir.path().join("cards");
        write(&cards.join("base.csv"), "card_name,card_number\nPikachu,058\nRaichu,014\n");
        write(&cards.join("broken.csv"), "name\nOops\n");
        let output = dir.path().join("card_prices.csv");

        let mut seed = stored("base", "Pikachu", "058", 40, "$0.10");
        seed.batch_start_time = Some("2024-01-01T00:00:00.000000".into());
        let other = stored("jungle", "Snorlax", "011", 40, "$3.00");
        crate::storage::write_dataset(&output, &[], &[seed, other.clone()]).unwrap();

        let pipeline = Pipeline::new(FakeSource::default(), &config(true));
        let stats = pipeline.run(&cards, &output).await.unwrap();

        assert_eq!(stats.sets, 1);
        assert_eq!(stats.catalog_errors, 1);
        assert_eq!(stats.scraped, 2);
        assert_eq!(stats.rows_written, Some(3));

        let saved = Dataset::load(&output).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved.rows()[0], other);

        let pikachu = saved.get(&card("Pikachu", "058").key("base")).unwrap();
        assert_eq!(pikachu.value("ungraded"), Some("$1.00"));
        assert_ne!(pikachu.batch_start_time.as_deref(), Some("2024-01-01T00:00:00.000000"));
    }

    #[tokio::test]
    async fn test_run_rejects_missing_input_without_touching_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("card_prices.csv");
        let pipeline = Pipeline::new(FakeSource::default(), &config(false));

        assert!(pipeline.run(&dir.path().join("nope"), &output).await.is_err());
        assert!(!output.exists());
        assert!(pipeline.source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_nothing_to_save_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(&dir.path().join("empty.csv"), "card_name,card_number\n,\n");
        let output = dir.path().join("card_prices.csv");

        let stats = Pipeline::new(FakeSource::default(), &config(false))
            .run(&input, &output)
            .await
            .unwrap();

        assert_eq!(stats.rows_written, None);
        assert!(!output.exists());
    }
}
