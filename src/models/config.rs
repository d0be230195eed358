//! Application configuration structures.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::UnmappedColumns;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Deployment the run belongs to; first segment of every blob key
    #[serde(default)]
    pub environment: Environment,

    /// Portal session and download settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Backoff for connection-level failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Blob store backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Relational store and loader settings
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if url::Url::parse(&self.crawler.base_url).is_err() {
            return Err(AppError::validation(format!(
                "crawler.base_url is not a valid URL: {}",
                self.crawler.base_url
            )));
        }
        if !self.crawler.download && self.crawler.fixture_path.as_os_str().is_empty() {
            return Err(AppError::validation(
                "crawler.fixture_path is required when crawler.download is false",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.retry.modulus == 0 {
            return Err(AppError::validation("retry.modulus must be > 0"));
        }
        if self.store.batch_size == 0 {
            return Err(AppError::validation("store.batch_size must be > 0"));
        }
        if self.store.revision_type.trim().is_empty() {
            return Err(AppError::validation("store.revision_type is empty"));
        }
        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.trim().is_empty() {
            return Err(AppError::validation("storage.bucket is empty"));
        }
        if self.lock.ttl_secs == 0 {
            return Err(AppError::validation("lock.ttl_secs must be > 0"));
        }
        for (key, pattern) in [
            ("store.region_regex_level_1", &self.store.region_regex_level_1),
            ("store.region_regex_level_2", &self.store.region_regex_level_2),
        ] {
            if let Some(pattern) = pattern {
                Regex::new(pattern).map_err(|e| {
                    AppError::validation(format!("{key} is not a valid expression: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Checks that only apply to the load stage.
    pub fn validate_for_load(&self) -> Result<()> {
        self.validate()?;
        if self.store.database_url.trim().is_empty() {
            return Err(AppError::validation("store.database_url is empty"));
        }
        if self.store.region_regex_level_1.is_none() || self.store.region_regex_level_2.is_none() {
            return Err(AppError::validation(
                "store.region_regex_level_1 and store.region_regex_level_2 are required",
            ));
        }
        Ok(())
    }
}

/// Running environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Test,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Test => "test",
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "test" => Ok(Self::Test),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(AppError::config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Full snapshots or change-only extracts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Full,
    Changed,
}

impl DataType {
    /// Extraction qualifier sent in listing queries.
    pub fn qualifier(&self) -> &'static str {
        match self {
            Self::Full => "AL",
            Self::Changed => "CH",
        }
    }

    /// Revision-type folder the artifacts are stored under.
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Full => "전체데이터",
            Self::Changed => "변동데이터",
        }
    }
}

impl FromStr for DataType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Full" | "full" | "AL" => Ok(Self::Full),
            "Changed" | "changed" | "CH" => Ok(Self::Changed),
            other => Err(AppError::config(format!("unknown data type '{other}'"))),
        }
    }
}

/// Portal session and download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub data_type: DataType,

    /// When false, the fixture archive stands in for every download
    #[serde(default = "defaults::download")]
    pub download: bool,

    #[serde(default = "defaults::fixture_path")]
    pub fixture_path: PathBuf,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            proxy: None,
            data_type: DataType::default(),
            download: defaults::download(),
            fixture_path: defaults::fixture_path(),
        }
    }
}

/// Exponential backoff with a modulus-bounded growth factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::retry_base")]
    pub base: u64,

    #[serde(default = "defaults::retry_modulus")]
    pub modulus: u64,

    /// Length of one backoff step in milliseconds
    #[serde(default = "defaults::retry_unit_ms")]
    pub unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base: defaults::retry_base(),
            modulus: defaults::retry_modulus(),
            unit_ms: defaults::retry_unit_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(AppError::config(format!("unknown storage backend '{other}'"))),
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "defaults::bucket")]
    pub bucket: String,

    /// Custom endpoint for S3-compatible stores
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Root directory for the local backend
    #[serde(default = "defaults::local_root")]
    pub local_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: defaults::bucket(),
            endpoint: None,
            region: None,
            local_root: defaults::local_root(),
        }
    }
}

/// Loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database_url: String,

    /// Explicit run timestamp to load instead of the latest run
    #[serde(default)]
    pub crawler_log_id: Option<String>,

    /// Province folder filter
    #[serde(default)]
    pub region_regex_level_1: Option<String>,

    /// District folder filter
    #[serde(default)]
    pub region_regex_level_2: Option<String>,

    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    #[serde(default = "defaults::revision_type")]
    pub revision_type: String,

    #[serde(default)]
    pub unmapped_columns: UnmappedColumns,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            crawler_log_id: None,
            region_regex_level_1: None,
            region_regex_level_2: None,
            batch_size: defaults::batch_size(),
            revision_type: defaults::revision_type(),
            unmapped_columns: UnmappedColumns::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Incoming webhook receiving `{"text": ...}` payloads
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Single-flight lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "defaults::lock_path")]
    pub path: PathBuf,

    /// Seconds after which a lease left by a dead run may be taken over
    #[serde(default = "defaults::lock_ttl")]
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: defaults::lock_path(),
            ttl_secs: defaults::lock_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            json: false,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn base_url() -> String {
        "http://openapi.nsdi.go.kr/".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; landsync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        60
    }
    pub fn download() -> bool {
        true
    }
    pub fn fixture_path() -> PathBuf {
        PathBuf::from("data/fixture.zip")
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn retry_base() -> u64 {
        2
    }
    pub fn retry_modulus() -> u64 {
        10
    }
    pub fn retry_unit_ms() -> u64 {
        1000
    }

    // Storage defaults
    pub fn bucket() -> String {
        "landsync".into()
    }
    pub fn local_root() -> PathBuf {
        PathBuf::from("storage")
    }

    // Store defaults
    pub fn batch_size() -> usize {
        10_000
    }
    pub fn revision_type() -> String {
        "전체데이터".into()
    }

    // Lock defaults
    pub fn lock_path() -> PathBuf {
        std::env::temp_dir().join("landsync.lock")
    }
    pub fn lock_ttl() -> u64 {
        6 * 60 * 60
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
