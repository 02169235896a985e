//! Persisted price dataset: a single CSV, one row per card key.
//!
//! Every run reads it once and rewrites it once. New rows supersede stored rows
//! with the same `(set, card_name, card_number)`; everything else is kept as read.

use crate::models::{CardKey, PriceRow};
use crate::scraper::cleaner::KNOWN_CONDITIONS;
use crate::utils::parse_timestamp;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::StringRecord;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const IDENTITY_COLUMNS: [&str; 3] = ["set", "card_name", "card_number"];
const TIMESTAMP_COLUMNS: [&str; 2] = ["batch_start_time", "scraped_at"];
const ERROR_COLUMNS: [&str; 3] = ["status", "error_type", "error_message"];
const URL_COLUMN: &str = "url";

fn fixed_columns() -> impl Iterator<Item = &'static str> {
    IDENTITY_COLUMNS
        .into_iter()
        .chain(TIMESTAMP_COLUMNS)
        .chain(KNOWN_CONDITIONS)
        .chain(ERROR_COLUMNS)
        .chain([URL_COLUMN])
}

/// Output column order: identity, timestamps, known prices, error fields, url,
/// then the other columns of `header` in their order, then any column only
/// the rows carry, in first-seen order.
pub fn canonical_columns(header: &[String], rows: &[PriceRow]) -> Vec<String> {
    let mut columns: Vec<String> = fixed_columns().map(str::to_string).collect();
    let mut seen: HashSet<String> = columns.iter().cloned().collect();

    for name in header {
        if seen.insert(name.clone()) {
            columns.push(name.clone());
        }
    }
    for row in rows {
        for name in row.values.keys() {
            if seen.insert(name.clone()) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn row_from_record(headers: &StringRecord, record: &StringRecord) -> PriceRow {
    let mut row = PriceRow::default();

    for (name, value) in headers.iter().zip(record.iter()) {
        let text = || Some(value.to_string());
        match name {
            "set" => row.key.set = value.to_string(),
            "card_name" => row.key.card_name = value.to_string(),
            "card_number" => row.key.card_number = value.to_string(),
            // Empty cells are absent values
            _ if value.is_empty() => {}
            "batch_start_time" => row.batch_start_time = text(),
            "scraped_at" => row.scraped_at = text(),
            "status" => row.status = text(),
            "error_type" => row.error_type = text(),
            "error_message" => row.error_message = text(),
            "url" => row.url = text(),
            other => {
                row.values.insert(other.to_string(), value.to_string());
            }
        }
    }
    row
}

fn row_to_record(row: &PriceRow, columns: &[String]) -> StringRecord {
    columns
        .iter()
        .map(|column| match column.as_str() {
            "set" => row.key.set.as_str(),
            "card_name" => row.key.card_name.as_str(),
            "card_number" => row.key.card_number.as_str(),
            "batch_start_time" => row.batch_start_time.as_deref().unwrap_or_default(),
            "scraped_at" => row.scraped_at.as_deref().unwrap_or_default(),
            "status" => row.status.as_deref().unwrap_or_default(),
            "error_type" => row.error_type.as_deref().unwrap_or_default(),
            "error_message" => row.error_message.as_deref().unwrap_or_default(),
            "url" => row.url.as_deref().unwrap_or_default(),
            other => row.value(other).unwrap_or_default(),
        })
        .collect()
}

// ── Dataset ───────────────────────────────────────────────────────────────────

/// Rows read from the output file, addressable by card key.
#[derive(Debug, Default)]
pub struct Dataset {
    header: Vec<String>,
    rows: Vec<PriceRow>,
    index: HashMap<CardKey, usize>,
}

impl Dataset {
    pub fn from_rows(rows: Vec<PriceRow>) -> Self {
        // Later duplicates win
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.key.clone(), i))
            .collect();
        Self {
            header: Vec::new(),
            rows,
            index,
        }
    }

    /// Load the dataset at `path`; a missing file is an empty dataset.
    /// All cells are read as text, so card numbers like "007" survive.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No existing dataset at {:?}", path);
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open dataset {:?}", path))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {:?}", path))?
            .clone();

        let mut rows = Vec::new();
        for (i, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Row {} in {:?}", i + 1, path))?;
            rows.push(row_from_record(&headers, &record));
        }

        info!("Loaded {} existing rows from {:?}", rows.len(), path);
        Ok(Self {
            header: headers.iter().map(str::to_string).collect(),
            ..Self::from_rows(rows)
        })
    }

    /// Column names as read from disk, empty for a dataset built in memory.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn get(&self, key: &CardKey) -> Option<&PriceRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<PriceRow> {
        self.rows
    }

    pub fn stats(&self) -> DatasetStats {
        let mut stats = DatasetStats {
            rows: self.rows.len(),
            ..Default::default()
        };
        let mut sets = BTreeSet::new();

        for row in self.rows() {
            sets.insert(row.key.set.as_str());
            if row.is_failed() {
                stats.failed += 1;
                let kind = row.error_type.clone().unwrap_or_else(|| "unspecified".to_string());
                *stats.failures_by_type.entry(kind).or_default() += 1;
            } else {
                stats.succeeded += 1;
            }

            if let Some(ts) = row.scraped_at.as_deref().and_then(|s| parse_timestamp(s).ok()) {
                stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
                stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
            }
        }
        stats.sets = sets.len();
        stats
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DatasetStats {
    pub rows: usize,
    pub sets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_type: BTreeMap<String, usize>,
    pub oldest: Option<NaiveDateTime>,
    pub newest: Option<NaiveDateTime>,
}

// ── Merge & persist ───────────────────────────────────────────────────────────

/// Drop stored rows superseded by `fresh`, then append `fresh`.
/// The result holds exactly one row per key; among duplicates the last one wins
/// and keeps the position of the first.
pub fn merge(existing: Dataset, fresh: Vec<PriceRow>) -> Vec<PriceRow> {
    let fresh_keys: HashSet<CardKey> = fresh.iter().map(|r| r.key.clone()).collect();

    let mut merged: Vec<PriceRow> = Vec::with_capacity(existing.len() + fresh.len());
    let mut position: HashMap<CardKey, usize> = HashMap::new();

    let kept = existing
        .into_rows()
        .into_iter()
        .filter(|row| !fresh_keys.contains(&row.key));

    for row in kept.chain(fresh) {
        match position.get(&row.key) {
            Some(&i) => merged[i] = row,
            None => {
                position.insert(row.key.clone(), merged.len());
                merged.push(row);
            }
        }
    }
    merged
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset.csv".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Replace the file at `path` with `rows` in canonical column order, keeping
/// the extra columns of `header` where they were.
/// Written to a sibling temp file first, then renamed over the target.
pub fn write_dataset(path: &Path, header: &[String], rows: &[PriceRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let columns = canonical_columns(header, rows);
    let tmp = temp_path(path);
    {
        let mut writer =
            csv::Writer::from_path(&tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
        writer.write_record(&columns)?;
        for row in rows {
            writer
                .write_record(&row_to_record(row, &columns))
                .with_context(|| format!("write row {}", row.key))?;
        }
        writer.flush().with_context(|| format!("Failed to flush {:?}", tmp))?;
    }

    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} to {:?}", tmp, path))?;
    Ok(())
}

/// Merge `fresh` into `existing` and write the result.
/// Returns the number of rows written, or `None` when there was nothing to write.
pub fn save_merged(path: &Path, existing: Dataset, fresh: Vec<PriceRow>) -> Result<Option<usize>> {
    if existing.is_empty() && fresh.is_empty() {
        return Ok(None);
    }

    let header = existing.header().to_vec();
    let merged = merge(existing, fresh);
    if merged.is_empty() {
        return Ok(None);
    }
    write_dataset(path, &header, &merged)?;
    Ok(Some(merged.len()))
}
