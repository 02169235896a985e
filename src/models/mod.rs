use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::format_timestamp;

// ── Catalog items ─────────────────────────────────────────────────────────────

/// One validated catalog row: both fields present and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    pub card_name: String,
    pub card_number: String,
}

impl CardRecord {
    pub fn key(&self, set: &str) -> CardKey {
        CardKey {
            set: set.to_string(),
            card_name: self.card_name.clone(),
            card_number: self.card_number.clone(),
        }
    }
}

/// Composite identity `(set, card_name, card_number)` used for freshness and merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardKey {
    pub set: String,
    pub card_name: String,
    pub card_number: String,
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} #{}", self.set, self.card_name, self.card_number)
    }
}

// ── Failure taxonomy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ParsingFailed,
    NoPricesAvailable,
    RequestTimeout,
    ConnectionError,
    HttpError,
    RequestFailed,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParsingFailed => "parsing_failed",
            ErrorKind::NoPricesAvailable => "no_prices_available",
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::HttpError => "http_error",
            ErrorKind::RequestFailed => "request_failed",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown error type {0:?}")]
pub struct UnknownErrorKind(String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "not_found" => ErrorKind::NotFound,
            "parsing_failed" => ErrorKind::ParsingFailed,
            "no_prices_available" => ErrorKind::NoPricesAvailable,
            "request_timeout" => ErrorKind::RequestTimeout,
            "connection_error" => ErrorKind::ConnectionError,
            "http_error" => ErrorKind::HttpError,
            "request_failed" => ErrorKind::RequestFailed,
            "unknown_error" => ErrorKind::UnknownError,
            other => return Err(UnknownErrorKind(other.to_string())),
        })
    }
}

/// Classified failure of one fetch: the failure half of a [`PriceSnapshot`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ScrapeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ScrapeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// Normalised condition column (`ungraded`, `grade_9`, `psa_10`, ...) → displayed price.
pub type Prices = BTreeMap<String, String>;

/// Either a non-empty price map or a classified failure; never both.
pub type ScrapeOutcome = Result<Prices, ScrapeError>;

/// Result of one fetch attempt for a card.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub key: CardKey,
    pub url: String,
    pub batch_start_time: NaiveDateTime,
    pub scraped_at: NaiveDateTime,
    pub outcome: ScrapeOutcome,
}

// ── Persisted rows ────────────────────────────────────────────────────────────

pub const STATUS_FAILED: &str = "failed";

/// One row of the persisted dataset.
///
/// Timestamps are kept as the text read from disk so untouched rows round-trip
/// unchanged; `values` holds price columns and any unrecognised extra columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceRow {
    pub key: CardKey,
    pub batch_start_time: Option<String>,
    pub scraped_at: Option<String>,
    pub status: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub url: Option<String>,
    pub values: BTreeMap<String, String>,
}

impl PriceRow {
    pub fn is_failed(&self) -> bool {
        self.status.as_deref() == Some(STATUS_FAILED)
    }

    pub fn value(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

impl From<PriceSnapshot> for PriceRow {
    fn from(snapshot: PriceSnapshot) -> Self {
        let mut row = PriceRow {
            key: snapshot.key,
            batch_start_time: Some(format_timestamp(&snapshot.batch_start_time)),
            scraped_at: Some(format_timestamp(&snapshot.scraped_at)),
            url: Some(snapshot.url),
            ..Default::default()
        };
        match snapshot.outcome {
            Ok(prices) => row.values = prices,
            Err(err) => {
                row.status = Some(STATUS_FAILED.to_string());
                row.error_type = Some(err.kind.to_string());
                row.error_message = Some(err.message);
            }
        }
        row
    }
}
