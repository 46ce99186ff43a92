// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ProjectConfig, RawProjectConfig};
use crate::errors::Result;

/// Overrides `[store].url`.
pub const DB_URL_ENV: &str = "STAGEHAND_DB_URL";

/// Load a project file and return the raw `RawProjectConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawProjectConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawProjectConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a project file, apply environment overrides and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectConfig> {
    let mut raw = load_from_path(&path)?;
    apply_env_overrides(&mut raw, |key| std::env::var(key).ok());
    ProjectConfig::try_from(raw)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
///
/// Commands that only read the store work without a project file.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ProjectConfig> {
    let path = path.as_ref();
    if path.exists() {
        return load_and_validate(path);
    }
    debug!(path = %path.display(), "No project file, using defaults");
    let mut raw = RawProjectConfig::default();
    apply_env_overrides(&mut raw, |key| std::env::var(key).ok());
    ProjectConfig::try_from(raw)
}

/// Apply environment overrides through `lookup` (usually `std::env::var`).
pub fn apply_env_overrides<F>(raw: &mut RawProjectConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(DB_URL_ENV).filter(|u| !u.trim().is_empty()) {
        debug!(url = %url, "Store url overridden from {DB_URL_ENV}");
        raw.store.url = Some(url);
    }
}
