//! Blob key layout for crawl runs.
//!
//! ```text
//! {env}/{yyyy}/{mm}/{dd}/{run_ts}/{dataset}/data/{revision_type}/{province}/{district}/base_date_{date}/{file}
//! {env}/{yyyy}/{mm}/{dd}/{run_ts}/{dataset}/crawler-log/{run_ts}.json
//! ```
//!
//! Run dates are calendar dates in Asia/Seoul.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

use crate::error::{AppError, Result};
use crate::models::{Category, Environment};

/// Directory holding a category's crawl logs.
pub const CRAWLER_LOG_DIR: &str = "crawler-log";

/// Directory holding a category's artifacts.
pub const DATA_DIR: &str = "data";

/// District folder for single-token region names.
pub const ALL_DISTRICTS: &str = "ALL";

const KST_OFFSET_SECS: i32 = 9 * 60 * 60;

fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("UTC+9 is a valid offset")
}

/// Identifier of one crawl run: its start time in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    timestamp: String,
    started_at: DateTime<FixedOffset>,
}

impl RunId {
    /// Run starting now.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Run starting at the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        let timestamp = format!(
            "{}.{:06}",
            instant.timestamp(),
            instant.timestamp_subsec_micros()
        );
        Self {
            timestamp,
            started_at: instant.with_timezone(&kst()),
        }
    }

    /// Rebuild a run from its timestamp string, as found in blob keys.
    pub fn from_timestamp(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
        let invalid = || AppError::validation(format!("invalid run timestamp '{raw}'"));

        let secs: i64 = secs.parse().map_err(|_| invalid())?;
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let started_at = DateTime::from_timestamp(secs, 0)
            .ok_or_else(invalid)?
            .with_timezone(&kst());

        Ok(Self {
            timestamp: raw.to_string(),
            started_at,
        })
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Run start as a calendar date in Asia/Seoul.
    pub fn date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    /// `{env}/{yyyy}/{mm}/{dd}/{run_ts}/`
    pub fn prefix(&self, env: Environment) -> String {
        let date = self.date();
        format!(
            "{}/{}/{:02}/{:02}/{}/",
            env,
            date.year(),
            date.month(),
            date.day(),
            self.timestamp
        )
    }

    /// Key of the category's crawl log for this run.
    pub fn log_key(&self, env: Environment, category: Category) -> String {
        format!(
            "{}{}/{}/{}.json",
            self.prefix(env),
            category.dataset_name(),
            CRAWLER_LOG_DIR,
            self.timestamp
        )
    }

    /// Key of an artifact collected in this run.
    pub fn artifact_key(
        &self,
        env: Environment,
        category: Category,
        revision_type: &str,
        region_name: &str,
        base_date: NaiveDate,
        file_name: &str,
    ) -> String {
        let (province, district) = split_region(region_name);
        format!(
            "{}{}/{}/{}/{}/{}/base_date_{}/{}",
            self.prefix(env),
            category.dataset_name(),
            DATA_DIR,
            revision_type,
            province,
            district,
            base_date.format("%Y-%m-%d"),
            file_name
        )
    }
}

/// Split a region name into province and district folder names.
///
/// The first whitespace token is the province, the remaining tokens joined
/// by a space are the district, or `ALL` for single-token names.
pub fn split_region(region_name: &str) -> (String, String) {
    let mut tokens = region_name.split_whitespace();
    let province = tokens.next().unwrap_or_default().to_string();
    let district = tokens.collect::<Vec<_>>().join(" ");
    if district.is_empty() {
        (province, ALL_DISTRICTS.to_string())
    } else {
        (province, district)
    }
}

/// Root prefix all runs of an environment live under.
pub fn environment_prefix(env: Environment) -> String {
    format!("{env}/")
}
