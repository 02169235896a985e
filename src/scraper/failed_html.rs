use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// `https://host/game/base-set/pikachu-25` → `debug_failed_pikachu-25.html`
pub fn file_name_for(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    format!("debug_failed_{}.html", last)
}

/// Write a page that could not be parsed under `folder` for offline inspection.
pub fn save(folder: &Path, url: &str, html: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(folder).with_context(|| format!("Could not create dir {:?}", folder))?;
    let path = folder.join(file_name_for(url));
    std::fs::write(&path, html).with_context(|| format!("Could not write {:?}", path))?;
    Ok(path)
}
