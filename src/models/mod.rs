// src/models/mod.rs

//! Domain models for the crawler and loader.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod columns;
mod config;
mod crawl_log;
mod region;
pub(crate) mod revision;
mod watermark;

// Re-export all public types
pub use columns::{ColumnMap, ColumnSpec, ColumnType, UnmappedColumns};
pub use config::{
    Config, CrawlerConfig, DataType, Environment, LockConfig, LoggingConfig, NotifyConfig,
    RetryConfig, StorageBackend, StorageConfig, StoreConfig,
};
pub use crawl_log::{CrawlLog, CrawlStatistics, RegionDate};
pub use region::{Region, canonical_region};
pub use revision::{Category, DownloadToken, ListingPage, ListingQuery, RevisionRecord};
pub use watermark::{SENTINEL_DATE, WatermarkMap};

use crate::error::Result;

/// Conversion between a record and the raw representation it was read from.
///
/// Listing rows render back to their `<tr>` markup, regions and crawl logs
/// to JSON.
pub trait Markup: Sized {
    /// Raw representation of this record.
    fn render(&self) -> String;

    /// Parse a record from its raw representation.
    fn parse(raw: &str) -> Result<Self>;
}
