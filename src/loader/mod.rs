//! Catalog loader: one CSV per set, the file stem names the set.

use crate::models::CardRecord;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw catalog row; any other columns in the file are ignored.
#[derive(Debug, Deserialize)]
struct RawCatalogRow {
    card_name: Option<String>,
    card_number: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    let s = s?.trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Set name from catalog filename: `cards/base-set.csv` → `base-set`.
pub fn set_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();
    if stem.is_empty() { None } else { Some(stem.to_string()) }
}

/// Read a catalog, keeping only rows with a non-blank name and number.
pub fn load_catalog(path: &Path) -> Result<Vec<CardRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("Failed to open catalog {:?}", path))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", path))?;
    if !headers.iter().any(|h| h == "card_name") || !headers.iter().any(|h| h == "card_number") {
        bail!("Catalog {:?} needs card_name and card_number columns", path);
    }

    let mut cards = Vec::new();
    let mut dropped = 0usize;

    for (i, result) in reader.deserialize::<RawCatalogRow>().enumerate() {
        let raw = result.with_context(|| format!("Row {} in {:?}", i + 1, path))?;
        match (non_blank(raw.card_name), non_blank(raw.card_number)) {
            (Some(card_name), Some(card_number)) => cards.push(CardRecord { card_name, card_number }),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("{:?}: dropped {} incomplete rows", path, dropped);
    }
    Ok(cards)
}

/// Resolve the scrape input to catalog files.
/// A file must be a `.csv`; a folder yields every `.csv` directly inside it, sorted.
pub fn discover_catalogs(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        bail!("Path {:?} not found", input);
    }

    if input.is_file() {
        if !is_csv(input) {
            bail!(
                "File must be a CSV file, got {:?}",
                input.extension().unwrap_or_default()
            );
        }
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(input).with_context(|| format!("Failed to list {:?}", input))? {
        let path = entry?.path();
        if path.is_file() && is_csv(&path) {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("No CSV files found in {:?}", input);
    }
    Ok(files)
}

fn is_csv(path: &Path) -> bool {
    path.extension().map(|e| e == "csv").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "base-set.csv",
            "card_name,card_number,rarity\n\
             Pikachu,058,common\n\
             Charizard,,holo\n\
             ,004,holo\n\
             \"  Blastoise \",  002 ,holo\n\
             Mewtwo,   \n",
        );

        let cards = load_catalog(&path).unwrap();
        assert_eq!(
            cards,
            vec![
                CardRecord { card_name: "Pikachu".into(), card_number: "058".into() },
                CardRecord { card_name: "Blastoise".into(), card_number: "002".into() },
            ]
        );
    }

    #[test]
    fn test_short_rows_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "s.csv", "card_name,card_number\nPikachu\nRaichu,14\n");
        let cards = load_catalog(&path).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].card_number, "14");
    }

    #[test]
    fn test_missing_columns_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "s.csv", "name,number\nPikachu,1\n");
        assert!(load_catalog(&path).is_err());
    }

    #[test]
    fn test_set_name_from_path() {
        assert_eq!(set_name_from_path(Path::new("cards/base-set.csv")).as_deref(), Some("base-set"));
        assert_eq!(set_name_from_path(Path::new("/")), None);
    }

    #[test]
    fn test_discover_folder_sorted_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "jungle.csv", "card_name,card_number\n");
        write(dir.path(), "base-set.csv", "card_name,card_number\n");
        write(dir.path(), "notes.txt", "x");

        let files = discover_catalogs(dir.path()).unwrap();
        let names: Vec<_> = files.iter().filter_map(|p| set_name_from_path(p)).collect();
        assert_eq!(names, vec!["base-set", "jungle"]);
    }

    #[test]
    fn test_discover_rejects_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_catalogs(dir.path()).is_err());
        assert!(discover_catalogs(&dir.path().join("missing")).is_err());

        let txt = write(dir.path(), "cards.txt", "x");
        assert!(discover_catalogs(&txt).is_err());

        let csv = write(dir.path(), "fossil.csv", "card_name,card_number\n");
        assert_eq!(discover_catalogs(&csv).unwrap(), vec![csv]);
    }
}
