// src/config.rs

//! Configuration loading utilities.
//!
//! A TOML file provides the base configuration, deployment environment
//! variables override it: `CRAWLER_*` for crawl settings, `STORE_*` for
//! loader settings, plus the shared `ENVIRONMENT`, `S3_BUCKET`,
//! `S3_ENDPOINT` and `DATABASE_URL`.

use std::path::Path;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{Config, UnmappedColumns};

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            info!(path = %path.display(), "Loaded configuration");
            Ok(toml::from_str(&content)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the file, apply process environment overrides and validate.
pub fn load(path: &Path) -> Result<Config> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Configuration for environments without a config file.
pub fn from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Override configuration values from an environment lookup.
///
/// Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = var("ENVIRONMENT") {
        config.environment = v.parse()?;
    }

    // Crawler
    if let Some(v) = var("CRAWLER_BASE_URL") {
        config.crawler.base_url = v;
    }
    if let Some(v) = var("CRAWLER_USER_AGENT") {
        config.crawler.user_agent = v;
    }
    if let Some(v) = var("CRAWLER_TIMEOUT_SECS") {
        config.crawler.timeout_secs = parse_var("CRAWLER_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = var("CRAWLER_PROXY") {
        config.crawler.proxy = Some(v);
    }
    if let Some(v) = var("CRAWLER_DATA_TYPE") {
        config.crawler.data_type = v.parse()?;
    }
    if let Some(v) = var("CRAWLER_DOWNLOAD") {
        config.crawler.download = parse_bool("CRAWLER_DOWNLOAD", &v)?;
    }
    if let Some(v) = var("CRAWLER_FIXTURE_PATH") {
        config.crawler.fixture_path = v.into();
    }
    if let Some(v) = var("CRAWLER_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_var("CRAWLER_RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = var("CRAWLER_WEBHOOK_URL") {
        config.notify.webhook_url = Some(v);
    }

    // Storage
    if let Some(v) = var("STORAGE_BACKEND") {
        config.storage.backend = v.parse()?;
    }
    if let Some(v) = var("S3_BUCKET") {
        config.storage.bucket = v;
    }
    if let Some(v) = var("S3_ENDPOINT") {
        config.storage.endpoint = Some(v);
    }
    if let Some(v) = var("AWS_REGION") {
        config.storage.region = Some(v);
    }

    // Store
    if let Some(v) = var("STORE_DATABASE_URL").or_else(|| var("DATABASE_URL")) {
        config.store.database_url = v;
    }
    if let Some(v) = var("STORE_CRAWLER_LOG_ID") {
        config.store.crawler_log_id = Some(v);
    }
    if let Some(v) = var("STORE_REGION_REGEX_LEVEL_1") {
        config.store.region_regex_level_1 = Some(v);
    }
    if let Some(v) = var("STORE_REGION_REGEX_LEVEL_2") {
        config.store.region_regex_level_2 = Some(v);
    }
    if let Some(v) = var("STORE_BATCH_SIZE") {
        config.store.batch_size = parse_var("STORE_BATCH_SIZE", &v)?;
    }
    if let Some(v) = var("STORE_REVISION_TYPE") {
        config.store.revision_type = v;
    }
    if let Some(v) = var("STORE_UNMAPPED_COLUMNS") {
        config.store.unmapped_columns = match v.trim() {
            "drop" => UnmappedColumns::Drop,
            "pass_through" => UnmappedColumns::PassThrough,
            other => {
                return Err(AppError::config(format!(
                    "STORE_UNMAPPED_COLUMNS must be drop or pass_through, got '{other}'"
                )));
            }
        };
    }

    if let Some(v) = var("LOCK_PATH") {
        config.lock.path = v.into();
    }
    if let Some(v) = var("LOG_FORMAT") {
        config.logging.json = v.eq_ignore_ascii_case("json");
    }

    Ok(())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{key}: invalid value '{value}': {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::config(format!("{key}: invalid boolean '{value}'"))),
    }
}
