// src/services/listing.rs

//! Listing fetcher for the open-data portal.
//!
//! Revisions are listed by a POSTed search form; archives are fetched by
//! POSTing the fields of a row's download token.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Category, DownloadToken, ListingPage, ListingQuery, Markup};
use crate::services::{ArtifactSource, ListingSource};
use crate::utils::http::HttpClient;
use crate::utils::sanitize_file_name;

const LISTING_PATH: &str = "/nsdi/eios/ServiceDetail.do";
const DOWNLOAD_PATH: &str = "/nsdi/eios/fileDownload.do";

/// Service for reading revision listings and downloading archives.
pub struct ListingFetcher {
    http: Arc<HttpClient>,
}

impl ListingFetcher {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ListingSource for ListingFetcher {
    async fn fetch_page(&self, query: &ListingQuery, page_index: u32) -> Result<ListingPage> {
        let body = self
            .http
            .post_form_text(LISTING_PATH, &query.form(page_index))
            .await?;
        let page = ListingPage::parse(&body)?;
        debug!(
            category = %query.category,
            page = page_index,
            rows = page.rows.len(),
            total_pages = page.total_pages,
            "Fetched listing page"
        );
        Ok(page)
    }
}

#[async_trait]
impl ArtifactSource for ListingFetcher {
    async fn download(
        &self,
        category: Category,
        token: &DownloadToken,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let dest = dest_dir.join(sanitize_file_name(&token.file_name));
        let bytes = self
            .http
            .download_to(DOWNLOAD_PATH, &token.form(category.provider()), &dest)
            .await?;
        info!(category = %category, file = %token.file_name, bytes, "Downloaded archive");
        Ok(dest)
    }
}
