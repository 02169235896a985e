use crate::config::IncrementalConfig;
use crate::models::CardKey;
use crate::storage::Dataset;
use crate::utils::parse_timestamp;
use chrono::NaiveDateTime;

/// Stored price that marks a row as usable.
const ANCHOR_PRICE: &str = "ungraded";

#[derive(Debug, Clone, PartialEq)]
pub struct Freshness {
    pub should_scrape: bool,
    pub reason: String,
}

impl Freshness {
    fn scrape(reason: impl Into<String>) -> Self {
        Self {
            should_scrape: true,
            reason: reason.into(),
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_scrape: false,
            reason: reason.into(),
        }
    }
}

/// Decides per card whether the stored row can be reused.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    enabled: bool,
    max_age_days: f64,
}

impl FreshnessPolicy {
    pub fn new(config: &IncrementalConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_age_days: config.max_age_days,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn decide(&self, key: &CardKey, existing: &Dataset, now: NaiveDateTime) -> Freshness {
        if !self.enabled {
            return Freshness::scrape("incremental mode disabled");
        }

        let Some(row) = existing.get(key) else {
            return Freshness::scrape("no existing data");
        };

        if row.is_failed() || row.value(ANCHOR_PRICE).is_none() {
            return Freshness::scrape("previous scrape failed or no price");
        }

        let Some(scraped_at) = row.scraped_at.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Freshness::scrape("no timestamp");
        };

        let scraped_at = match parse_timestamp(scraped_at) {
            Ok(ts) => ts,
            Err(e) => return Freshness::scrape(format!("invalid timestamp: {}", e)),
        };

        let age_days = (now - scraped_at).num_milliseconds() as f64 / 86_400_000.0;
        if age_days > self.max_age_days {
            Freshness::scrape(format!(
                "data is {:.1} days old (max: {})",
                age_days, self.max_age_days
            ))
        } else {
            Freshness::skip(format!("data is {:.1} days old (fresh)", age_days))
        }
    }
}
