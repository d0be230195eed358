//! Service layer for the crawler application.
//!
//! This module contains the portal-facing collaborators:
//! - Listing pages and archive downloads (`ListingFetcher`)
//! - Administrative regions (`RegionDirectory`)
//! - Run summaries (`WebhookNotifier`, `LogNotifier`)
//!
//! Each is reached through a trait so the orchestrator can run against
//! in-memory fakes.

mod listing;
mod notifier;
mod regions;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Category, DownloadToken, ListingPage, ListingQuery, Region};

pub use listing::ListingFetcher;
pub use notifier::{
    LogNotifier, Notifier, WebhookNotifier, from_config as build_notifier, notify_best_effort,
};
pub use regions::RegionDirectory;

/// Paginated listing of dataset revisions.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one listing page (1-based) with its total page count.
    async fn fetch_page(&self, query: &ListingQuery, page_index: u32) -> Result<ListingPage>;
}

/// Binary archives referenced by listing rows.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download the archive for `token` into `dest_dir`, returning its path.
    async fn download(
        &self,
        category: Category,
        token: &DownloadToken,
        dest_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Two-tier administrative region hierarchy.
#[async_trait]
pub trait RegionSource: Send + Sync {
    /// Establish whatever session state region lookups for `category` need.
    async fn prepare(&self, category: Category) -> Result<()>;

    /// Top-tier regions.
    async fn fetch_regions(&self) -> Result<Vec<Region>>;

    /// Regions under a top-tier region.
    async fn fetch_child_regions(&self, code: &str) -> Result<Vec<Region>>;
}
