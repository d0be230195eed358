// src/pipeline/crawl.rs

//! Incremental crawl of both land datasets.
//!
//! One run, per category: load the watermark from the previous run's crawl
//! log, scan the listing window, collect every revision newer than its
//! region's watermark, then write a crawl log for the next run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{
    Category, Config, CrawlLog, CrawlStatistics, CrawlerConfig, Environment, ListingPage,
    ListingQuery, Markup, RevisionRecord, WatermarkMap,
};
use crate::services::{
    ArtifactSource, ListingFetcher, ListingSource, Notifier, RegionDirectory, RegionSource,
    build_notifier, notify_best_effort,
};
use crate::storage::{self, BlobStore, RunId, paths};
use crate::utils::http::HttpClient;
use crate::utils::retry::RetryPolicy;
use crate::utils::{log, sanitize_file_name};

use super::locate::{crawl_log_walk, resolve_latest};
use super::lock::RunLease;

/// Scan start when no crawl log exists.
pub const COLD_START_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2019, 1, 1) {
    Some(date) => date,
    None => panic!("cold start date out of range"),
};

/// Fixed look-back of a warm scan.
pub const LOOKBACK_DAYS: u64 = 25 * 7;

/// Inclusive listing date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Window for a scan on `today`; the end is one day past today.
pub fn scan_window(today: NaiveDate, cold_start: bool) -> ScanWindow {
    let start = if cold_start {
        COLD_START_DATE
    } else {
        today
            .checked_sub_days(Days::new(LOOKBACK_DAYS))
            .unwrap_or(COLD_START_DATE)
    };
    ScanWindow {
        start,
        end: today.checked_add_days(Days::new(1)).unwrap_or(today),
    }
}

/// Collaborators of one crawl run.
#[derive(Clone, Copy)]
pub struct CrawlSources<'a> {
    pub listing: &'a dyn ListingSource,
    pub artifacts: &'a dyn ArtifactSource,
    pub regions: &'a dyn RegionSource,
    pub blobs: &'a dyn BlobStore,
    pub notifier: &'a dyn Notifier,
}

/// Outcome of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub run_id: RunId,
    pub totals: CrawlStatistics,
    pub failures: CrawlStatistics,
    /// Crawl log keys written at FINALIZE
    pub logs: Vec<String>,
    /// Artifact keys uploaded during the run
    pub uploaded: Vec<String>,
}

/// Drives one crawl run and owns its watermark state.
pub struct CrawlOrchestrator<'a> {
    sources: CrawlSources<'a>,
    environment: Environment,
    crawler: &'a CrawlerConfig,
    run: RunId,
    watermarks: BTreeMap<Category, WatermarkMap>,
    cold_start: BTreeMap<Category, bool>,
    totals: CrawlStatistics,
    failures: CrawlStatistics,
    uploaded: Vec<String>,
}

impl<'a> CrawlOrchestrator<'a> {
    pub fn new(
        sources: CrawlSources<'a>,
        environment: Environment,
        crawler: &'a CrawlerConfig,
        run: RunId,
    ) -> Self {
        Self {
            sources,
            environment,
            crawler,
            run,
            watermarks: BTreeMap::new(),
            cold_start: BTreeMap::new(),
            totals: CrawlStatistics::default(),
            failures: CrawlStatistics::default(),
            uploaded: Vec::new(),
        }
    }

    pub fn watermark(&self, category: Category) -> Option<&WatermarkMap> {
        self.watermarks.get(&category)
    }

    pub fn is_cold_start(&self, category: Category) -> bool {
        self.cold_start.get(&category).copied().unwrap_or(true)
    }

    /// Run every stage for both categories.
    ///
    /// On abort nothing is rolled back; uploaded keys are logged instead.
    pub async fn run(&mut self, run_by: &str) -> Result<CrawlSummary> {
        let ts = self.run.timestamp().to_string();
        info!(run = %ts, env = %self.environment, run_by, "Crawl starting");
        notify_best_effort(
            self.sources.notifier,
            &format!(
                "TIME_STAMP: {ts}\nLooking for updates ({}, {run_by})",
                self.environment
            ),
        )
        .await;

        let logs = match self.crawl(run_by).await {
            Ok(logs) => logs,
            Err(e) => {
                if self.uploaded.is_empty() {
                    error!(run = %ts, error = %e, "Crawl aborted");
                } else {
                    error!(
                        run = %ts,
                        error = %e,
                        orphaned = ?self.uploaded,
                        "Crawl aborted; uploaded artifacts have no crawl log"
                    );
                }
                return Err(e);
            }
        };

        let stats = self.totals.failure_summary(&self.failures);
        log::summary("Crawl", &stats);
        let headline = if self.totals.total() == 0 {
            "No updates found"
        } else {
            "Update complete"
        };
        let lines: Vec<String> = stats.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        notify_best_effort(
            self.sources.notifier,
            &format!("{headline}\nTIME_STAMP: {ts}\n\n{}", lines.join("\n")),
        )
        .await;

        Ok(CrawlSummary {
            run_id: self.run.clone(),
            totals: self.totals,
            failures: self.failures,
            logs,
            uploaded: self.uploaded.clone(),
        })
    }

    async fn crawl(&mut self, run_by: &str) -> Result<Vec<String>> {
        for category in Category::ALL {
            self.load_watermark(category).await?;
        }

        for category in Category::ALL {
            match self.scan(category).await {
                Ok(()) => {}
                Err(AppError::NotFound(reason)) => {
                    info!(%category, %reason, "Nothing listed; skipping category");
                }
                Err(e) => return Err(e),
            }
            if self.totals.count(category) == 0 {
                info!(%category, "No new revisions collected");
            }
        }

        self.finalize(run_by).await
    }

    /// Seed the category's watermark keys and raise them from the latest log.
    async fn load_watermark(&mut self, category: Category) -> Result<()> {
        let regions = self.sources.regions;
        regions.prepare(category).await?;

        let mut map = WatermarkMap::new();
        let top = regions.fetch_regions().await?;
        map.seed(top.iter().map(|r| r.name.as_str()));
        if category.tracks_child_regions() {
            for region in &top {
                let children = regions.fetch_child_regions(&region.code).await?;
                map.seed(children.iter().map(|r| r.name.as_str()));
            }
        }

        let root = paths::environment_prefix(self.environment);
        let cold = match resolve_latest(self.sources.blobs, &root, &crawl_log_walk(category)).await
        {
            Ok(key) => {
                let raw = self.sources.blobs.get(&key).await?;
                let previous = CrawlLog::parse(&String::from_utf8_lossy(&raw))?;
                let unknown = map.apply_log(&previous);
                if !unknown.is_empty() {
                    warn!(%category, regions = ?unknown, "Crawl log regions missing from directory; ignored");
                }
                info!(
                    %category,
                    log = %key,
                    entries = previous.region_date.len(),
                    "Loaded watermark"
                );
                false
            }
            Err(e) if e.is_not_found() => {
                info!(%category, reason = %e, "No previous crawl log; cold start");
                true
            }
            Err(e) => return Err(e),
        };

        debug!(%category, regions = map.len(), cold, "Seeded watermark");
        self.watermarks.insert(category, map);
        self.cold_start.insert(category, cold);
        Ok(())
    }

    /// Scan the listing window, oldest page and oldest row first.
    async fn scan(&mut self, category: Category) -> Result<()> {
        let cold = self.is_cold_start(category);
        let window = scan_window(self.run.date(), cold);
        let query = ListingQuery {
            category,
            start_date: window.start,
            end_date: window.end,
            qualifier: self.crawler.data_type.qualifier().to_string(),
        };
        info!(%category, start = %window.start, end = %window.end, cold, "Scanning listing");

        let listing = self.sources.listing;
        let first = listing.fetch_page(&query, 1).await?;
        if first.is_empty() {
            return Err(AppError::not_found(format!(
                "no {category} revisions between {} and {}",
                window.start, window.end
            )));
        }

        let total_pages = first.total_pages;
        info!(%category, total_pages, "Paginating");
        let work = tempfile::TempDir::new()?;
        let mut first = Some(first);

        for page_index in (1..=total_pages).rev() {
            let held = if page_index == 1 { first.take() } else { None };
            let page: ListingPage = match held {
                Some(page) => page,
                None => listing.fetch_page(&query, page_index).await?,
            };
            for row in page.rows.iter().rev() {
                self.consider(row, work.path()).await?;
            }
        }
        Ok(())
    }

    /// Collect a row if it is newer than its region's watermark.
    async fn consider(&mut self, row: &RevisionRecord, work_dir: &Path) -> Result<()> {
        let Some(category) = row.category() else {
            debug!(dataset = %row.dataset_name, "Unrecognized dataset; skipping row");
            return Ok(());
        };

        let current = self
            .watermarks
            .get(&category)
            .and_then(|map| map.get(&row.region_name));
        match current {
            None => {
                warn!(%category, region = %row.region_name, "Region not in directory; skipping revision");
                self.failures.increment(category);
                return Ok(());
            }
            Some(mark) if row.revision_date <= mark => return Ok(()),
            Some(_) => {}
        }

        info!(
            %category,
            region = %row.region_name,
            base_date = %row.revision_date,
            file_size = %row.file_size,
            "Collecting revision"
        );
        self.collect(category, row, work_dir).await?;

        if let Some(map) = self.watermarks.get_mut(&category) {
            map.advance(&row.region_name, row.revision_date);
        }
        self.totals.increment(category);
        Ok(())
    }

    /// Download (or substitute) the archive and upload it.
    async fn collect(
        &mut self,
        category: Category,
        row: &RevisionRecord,
        work_dir: &Path,
    ) -> Result<String> {
        let bytes = if self.crawler.download {
            let path = self
                .sources
                .artifacts
                .download(category, &row.download_token, work_dir)
                .await?;
            let bytes = tokio::fs::read(&path).await?;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "Could not remove downloaded archive");
            }
            bytes
        } else {
            debug!(fixture = %self.crawler.fixture_path.display(), "Download disabled; using fixture");
            tokio::fs::read(&self.crawler.fixture_path).await?
        };

        let revision_type = match row.revision_type.trim() {
            "" => self.crawler.data_type.folder(),
            t => t,
        };
        let key = self.run.artifact_key(
            self.environment,
            category,
            revision_type,
            &row.region_name,
            row.revision_date,
            &sanitize_file_name(&row.download_token.file_name),
        );

        let receipt = self
            .sources
            .blobs
            .put(&key, bytes, "application/zip")
            .await?;
        self.uploaded.push(key.clone());
        info!(
            %category,
            location = %receipt.location,
            size = receipt.size,
            sha256 = %receipt.sha256,
            "Uploaded archive"
        );
        Ok(key)
    }

    /// Write crawl logs unless nothing at all was collected.
    async fn finalize(&mut self, run_by: &str) -> Result<Vec<String>> {
        let mut written = Vec::new();
        if self.totals.total() == 0 {
            info!("Nothing collected; no crawl log written");
            return Ok(written);
        }

        let finished = RunId::now();
        for category in Category::ALL {
            // A category that collected nothing still carries its watermarks forward.
            let log = CrawlLog {
                time_stamp: self.run.timestamp().to_string(),
                run_by: run_by.to_string(),
                finish_time_stamp: finished.timestamp().to_string(),
                total_statistics: self.totals.only(category),
                region_date: self
                    .watermarks
                    .get(&category)
                    .map(WatermarkMap::region_dates)
                    .unwrap_or_default(),
            };

            let key = self.run.log_key(self.environment, category);
            self.sources
                .blobs
                .put(&key, log.to_json()?.into_bytes(), "application/json")
                .await?;
            info!(
                %category,
                key = %key,
                zips = log.total_statistics.count(category),
                regions = log.region_date.len(),
                "Wrote crawl log"
            );
            written.push(key);
        }
        Ok(written)
    }
}

/// Crawl under the single-flight lease.
pub async fn run_crawler(config: &Config, run_by: &str) -> Result<CrawlSummary> {
    config.validate()?;
    let _lease = RunLease::acquire(
        &config.lock.path,
        "crawl",
        Duration::from_secs(config.lock.ttl_secs),
    )?;
    crawl_unlocked(config, run_by).await
}

/// Crawl without taking the lease; the caller holds it.
pub(crate) async fn crawl_unlocked(config: &Config, run_by: &str) -> Result<CrawlSummary> {
    let http = Arc::new(HttpClient::new(
        &config.crawler,
        RetryPolicy::from(&config.retry),
    )?);
    let fetcher = ListingFetcher::new(Arc::clone(&http));
    let directory = RegionDirectory::new(http);
    let blobs = storage::open(&config.storage).await?;
    let notifier = build_notifier(&config.notify)?;

    let sources = CrawlSources {
        listing: &fetcher,
        artifacts: &fetcher,
        regions: &directory,
        blobs: blobs.as_ref(),
        notifier: notifier.as_ref(),
    };
    CrawlOrchestrator::new(sources, config.environment, &config.crawler, RunId::now())
        .run(run_by)
        .await
}
