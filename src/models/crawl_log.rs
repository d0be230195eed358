// src/models/crawl_log.rs

//! Completion record written once per category at the end of a crawl.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{AppError, Result};
use crate::models::{Category, Markup};

/// Archive counts collected during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub land_use_zip_count: u64,
    pub land_feature_zip_count: u64,
}

impl CrawlStatistics {
    pub fn count(&self, category: Category) -> u64 {
        match category {
            Category::LandUse => self.land_use_zip_count,
            Category::LandFeature => self.land_feature_zip_count,
        }
    }

    pub fn increment(&mut self, category: Category) {
        match category {
            Category::LandUse => self.land_use_zip_count += 1,
            Category::LandFeature => self.land_feature_zip_count += 1,
        }
    }

    /// Copy keeping only the given category's count.
    pub fn only(&self, category: Category) -> Self {
        let mut stats = Self::default();
        match category {
            Category::LandUse => stats.land_use_zip_count = self.land_use_zip_count,
            Category::LandFeature => stats.land_feature_zip_count = self.land_feature_zip_count,
        }
        stats
    }

    pub fn total(&self) -> u64 {
        self.land_use_zip_count + self.land_feature_zip_count
    }

    /// Human readable `total / fail / percent` summary against a failure tally.
    pub fn failure_summary(&self, failures: &CrawlStatistics) -> Vec<(&'static str, String)> {
        Category::ALL
            .into_iter()
            .map(|category| {
                let total = self.count(category);
                let failed = failures.count(category);
                let line = if total == 0 {
                    format!("total: {total}, fail: {failed}")
                } else {
                    let percent = 100.0 * failed as f64 / total as f64;
                    format!("total: {total}, fail: {failed}, {percent:.1}%")
                };
                (category.slug(), line)
            })
            .collect()
    }
}

/// Last collected revision date for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDate {
    pub region: String,
    pub date: NaiveDate,
}

/// Immutable record of a finished crawl for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlLog {
    /// Run start, seconds since epoch as a decimal string
    pub time_stamp: String,
    pub run_by: String,
    pub finish_time_stamp: String,
    pub total_statistics: CrawlStatistics,
    pub region_date: Vec<RegionDate>,
}

impl CrawlLog {
    /// Pretty JSON body stored under the run's `crawler-log/` key.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Markup for CrawlLog {
    fn render(&self) -> String {
        self.to_json().unwrap_or_else(|e| {
            error!(error = %e, time_stamp = %self.time_stamp, "Failed to render crawl log");
            String::new()
        })
    }

    fn parse(raw: &str) -> Result<Self> {
        let log: CrawlLog = serde_json::from_str(raw)?;
        for (field, value) in [
            ("time_stamp", &log.time_stamp),
            ("finish_time_stamp", &log.finish_time_stamp),
        ] {
            if value.trim().parse::<f64>().is_err() {
                return Err(AppError::validation(format!(
                    "crawl log {field} is not numeric: '{value}'"
                )));
            }
        }
        Ok(log)
    }
}
