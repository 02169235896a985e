use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraping: ScraperConfig,
    #[serde(default)]
    pub output: OutputConfig,

    /// File the values were read from; `None` when it was missing.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in seconds; attempt `n` waits `retry_delay * n`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default)]
    pub save_failed_html: bool,

    #[serde(default = "default_debug_output_folder")]
    pub debug_output_folder: PathBuf,

    #[serde(default)]
    pub incremental: IncrementalConfig,
}

/// Pause between consecutive item requests within a set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_delay_min")]
    pub delay_min: f64,

    #[serde(default = "default_delay_max")]
    pub delay_max: f64,

    #[serde(default = "default_true")]
    pub use_random: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncrementalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_age_days")]
    pub max_age_days: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_folder")]
    pub default_folder: PathBuf,

    #[serde(default = "default_output_file")]
    pub default_output_file: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.pricecharting.com".to_string()
}
fn default_user_agents() -> Vec<String> {
    vec!["Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()]
}
fn default_timeout() -> f64 {
    15.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    2.0
}
fn default_delay_min() -> f64 {
    1.0
}
fn default_delay_max() -> f64 {
    3.0
}
fn default_true() -> bool {
    true
}
fn default_max_age_days() -> f64 {
    7.0
}
fn default_debug_output_folder() -> PathBuf {
    PathBuf::from("debug")
}
fn default_folder() -> PathBuf {
    PathBuf::from("cards")
}
fn default_output_file() -> PathBuf {
    PathBuf::from("card_prices.csv")
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agents: default_user_agents(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            rate_limit: RateLimitConfig::default(),
            headers: BTreeMap::new(),
            debug_mode: false,
            save_failed_html: false,
            debug_output_folder: default_debug_output_folder(),
            incremental: IncrementalConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            delay_min: default_delay_min(),
            delay_max: default_delay_max(),
            use_random: true,
        }
    }
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_days: default_max_age_days(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_folder: default_folder(),
            default_output_file: default_output_file(),
        }
    }
}

// ── Derived values ───────────────────────────────────────────────────────────

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }
}

impl RateLimitConfig {
    /// Random in `[delay_min, delay_max]` when `use_random`, otherwise `delay_min`.
    pub fn next_delay(&self) -> Duration {
        let secs = if self.use_random && self.delay_max > self.delay_min {
            rand::random_range(self.delay_min..=self.delay_max)
        } else {
            self.delay_min
        };
        Duration::from_secs_f64(secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from `path` (format by extension) + `CARDPRICE__*` environment overrides.
    /// A missing file falls back to defaults and leaves `source` empty.
    pub fn load(path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CARDPRICE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {:?}", path))?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .with_context(|| format!("Invalid config in {:?}", path))?;
        app_cfg.source = path.exists().then(|| path.to_path_buf());
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scraping;
        ensure!(!s.user_agents.is_empty(), "scraping.user_agents must not be empty");
        ensure!(s.max_retries >= 1, "scraping.max_retries must be at least 1");
        ensure!(
            s.timeout.is_finite() && s.timeout > 0.0,
            "scraping.timeout must be a positive number of seconds"
        );
        ensure!(
            s.retry_delay.is_finite() && s.retry_delay >= 0.0,
            "scraping.retry_delay must be a non-negative number of seconds"
        );

        let rl = &s.rate_limit;
        if !(rl.delay_min.is_finite() && rl.delay_max.is_finite()) {
            bail!("scraping.rate_limit delays must be finite");
        }
        if rl.delay_min < 0.0 || rl.delay_max < 0.0 {
            bail!("scraping.rate_limit delays must not be negative");
        }
        ensure!(
            rl.delay_min <= rl.delay_max,
            "scraping.rate_limit.delay_min ({}) exceeds delay_max ({})",
            rl.delay_min,
            rl.delay_max
        );
        ensure!(
            s.incremental.max_age_days >= 0.0,
            "scraping.incremental.max_age_days must not be negative"
        );

        url::Url::parse(&s.base_url)
            .with_context(|| format!("scraping.base_url {:?} is not a valid URL", s.base_url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.scraping.max_retries, 3);
        assert_eq!(cfg.scraping.timeout(), Duration::from_secs(15));
        assert_eq!(cfg.output.default_output_file, PathBuf::from("card_prices.csv"));
        assert!(!cfg.scraping.incremental.enabled);
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "scraping:\n  max_retries: 5\n  incremental:\n    enabled: true\n    max_age_days: 3\n  rate_limit:\n    use_random: false\noutput:\n  default_output_file: out/prices.csv"
        )
        .unwrap();

        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.source.as_deref(), Some(file.path()));
        assert_eq!(cfg.scraping.max_retries, 5);
        assert!(cfg.scraping.incremental.enabled);
        assert_eq!(cfg.scraping.incremental.max_age_days, 3.0);
        assert!(!cfg.scraping.rate_limit.use_random);
        assert_eq!(cfg.scraping.rate_limit.delay_min, 1.0);
        assert_eq!(cfg.scraping.base_url, "https://www.pricecharting.com");
        assert_eq!(cfg.output.default_output_file, PathBuf::from("out/prices.csv"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg.source, None);
        assert_eq!(cfg.scraping.retry_delay, 2.0);
    }

    #[test]
    fn test_rejects_infinite_durations() {
        let mut cfg = AppConfig::default();
        cfg.scraping.timeout = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scraping.retry_delay = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scraping.rate_limit.delay_max = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_delay_range() {
        let mut cfg = AppConfig::default();
        cfg.scraping.rate_limit.delay_min = 5.0;
        cfg.scraping.rate_limit.delay_max = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_user_agents() {
        let mut cfg = AppConfig::default();
        cfg.scraping.user_agents.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_fixed_delay() {
        let rl = RateLimitConfig {
            delay_min: 0.5,
            delay_max: 4.0,
            use_random: false,
        };
        assert_eq!(rl.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_random_delay_within_range() {
        let rl = RateLimitConfig {
            delay_min: 1.0,
            delay_max: 2.0,
            use_random: true,
        };
        for _ in 0..50 {
            let d = rl.next_delay();
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        }
    }
}
