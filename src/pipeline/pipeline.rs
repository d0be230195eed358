// src/pipeline/pipeline.rs

use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::models::Config;

use super::crawl::{CrawlSummary, crawl_unlocked};
use super::load::{LoadSummary, load_unlocked};
use super::lock::RunLease;

/// What a pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub crawl: CrawlSummary,
    /// `None` when the crawl collected nothing
    pub load: Option<LoadSummary>,
}

/// Crawl, then load exactly the run that crawl produced.
///
/// Both stages run under one lease.
pub async fn run_pipeline(config: &Config, run_by: &str) -> Result<PipelineSummary> {
    config.validate_for_load()?;
    let _lease = RunLease::acquire(
        &config.lock.path,
        "pipeline",
        Duration::from_secs(config.lock.ttl_secs),
    )?;

    info!("[1/2] Crawl");
    let crawl = crawl_unlocked(config, run_by).await?;
    if crawl.totals.total() == 0 {
        info!("Nothing collected; skipping load");
        return Ok(PipelineSummary { crawl, load: None });
    }

    info!(run = crawl.run_id.timestamp(), "[2/2] Load");
    let mut load_config = config.clone();
    load_config.store.crawler_log_id = Some(crawl.run_id.timestamp().to_string());
    let load = load_unlocked(&load_config, run_by).await?;

    Ok(PipelineSummary {
        crawl,
        load: Some(load),
    })
}
