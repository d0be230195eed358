// src/models/watermark.rs

//! Per-region watermark of the newest collected revision date.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{CrawlLog, RegionDate, canonical_region};

/// Date assigned to regions that have never been collected.
pub const SENTINEL_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1, 1, 1) {
    Some(date) => date,
    None => panic!("sentinel date out of range"),
};

/// Region name → last collected revision date, for one category.
///
/// Keys are fixed once seeded from the region directory and values only
/// move forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatermarkMap {
    dates: BTreeMap<String, NaiveDate>,
}

impl WatermarkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add regions at the sentinel date; existing entries are kept.
    pub fn seed<I, S>(&mut self, regions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in regions {
            let key = canonical_region(name.as_ref()).to_string();
            self.dates.entry(key).or_insert(SENTINEL_DATE);
        }
    }

    /// Raise seeded regions to the dates recorded in a previous run's log.
    ///
    /// Returns the log regions that are not part of the seeded set.
    pub fn apply_log(&mut self, log: &CrawlLog) -> Vec<String> {
        let mut unknown = Vec::new();
        for entry in &log.region_date {
            let key = canonical_region(&entry.region);
            match self.dates.get_mut(key) {
                Some(current) => {
                    if entry.date > *current {
                        *current = entry.date;
                    }
                }
                None => unknown.push(entry.region.clone()),
            }
        }
        unknown
    }

    /// Watermark for a listing region name, `None` if the region is not tracked.
    pub fn get(&self, region_name: &str) -> Option<NaiveDate> {
        self.dates.get(canonical_region(region_name)).copied()
    }

    /// Whether a revision for the region is newer than its watermark.
    pub fn is_newer(&self, region_name: &str, date: NaiveDate) -> bool {
        self.get(region_name).is_some_and(|current| date > current)
    }

    /// Move a tracked region's watermark forward. Returns whether it moved.
    pub fn advance(&mut self, region_name: &str, date: NaiveDate) -> bool {
        match self.dates.get_mut(canonical_region(region_name)) {
            Some(current) if date > *current => {
                *current = date;
                true
            }
            _ => false,
        }
    }

    /// Entries for the crawl log, excluding regions still at the sentinel.
    pub fn region_dates(&self) -> Vec<RegionDate> {
        self.dates
            .iter()
            .filter(|(_, date)| **date != SENTINEL_DATE)
            .map(|(region, date)| RegionDate {
                region: region.clone(),
                date: *date,
            })
            .collect()
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.dates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlStatistics;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn log_with(entries: &[(&str, NaiveDate)]) -> CrawlLog {
        CrawlLog {
            time_stamp: "1".to_string(),
            run_by: "TEST".to_string(),
            finish_time_stamp: "2".to_string(),
            total_statistics: CrawlStatistics::default(),
            region_date: entries
                .iter()
                .map(|(region, date)| RegionDate {
                    region: region.to_string(),
                    date: *date,
                })
                .collect(),
        }
    }

    #[test]
    fn test_seed_defaults_to_sentinel() {
        let mut map = WatermarkMap::new();
        map.seed(["서울특별시", "부산광역시"]);
        assert_eq!(map.get("서울특별시"), Some(SENTINEL_DATE));
        assert_eq!(map.len(), 2);
        assert!(map.region_dates().is_empty());
    }

    #[test]
    fn test_alias_shares_canonical_entry() {
        let mut map = WatermarkMap::new();
        map.seed(["인천광역시 미추홀구", "인천광역시 남구"]);
        assert_eq!(map.len(), 1);

        assert!(map.advance("인천광역시 남구", date(2023, 5, 1)));
        assert_eq!(map.get("인천광역시 미추홀구"), Some(date(2023, 5, 1)));
        assert!(map.regions().all(|r| r != "인천광역시 남구"));
    }

    #[test]
    fn test_apply_log_ignores_unknown_and_never_regresses() {
        let mut map = WatermarkMap::new();
        map.seed(["서울특별시", "부산광역시"]);
        map.advance("부산광역시", date(2023, 6, 1));

        let unknown = map.apply_log(&log_with(&[
            ("서울특별시", date(2023, 1, 1)),
            ("부산광역시", date(2022, 1, 1)),
            ("세종특별자치시", date(2023, 2, 2)),
        ]));

        assert_eq!(unknown, vec!["세종특별자치시".to_string()]);
        assert_eq!(map.get("서울특별시"), Some(date(2023, 1, 1)));
        assert_eq!(map.get("부산광역시"), Some(date(2023, 6, 1)));
        assert_eq!(map.get("세종특별자치시"), None);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut map = WatermarkMap::new();
        map.seed(["서울특별시"]);
        assert!(map.advance("서울특별시", date(2023, 3, 1)));
        assert!(!map.advance("서울특별시", date(2023, 2, 1)));
        assert!(!map.advance("서울특별시", date(2023, 3, 1)));
        assert_eq!(map.get("서울특별시"), Some(date(2023, 3, 1)));
        assert!(!map.advance("제주특별자치도", date(2023, 3, 1)));
    }

    #[test]
    fn test_is_newer() {
        let mut map = WatermarkMap::new();
        map.seed(["서울특별시"]);
        map.advance("서울특별시", date(2023, 3, 1));
        assert!(map.is_newer("서울특별시", date(2023, 3, 2)));
        assert!(!map.is_newer("서울특별시", date(2023, 3, 1)));
        assert!(!map.is_newer("울릉군", date(2030, 1, 1)));
    }

    #[test]
    fn test_region_dates_excludes_sentinel() {
        let mut map = WatermarkMap::new();
        map.seed(["서울특별시", "부산광역시"]);
        map.advance("서울특별시", date(2023, 3, 1));
        let entries = map.region_dates();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].region, "서울특별시");
    }
}
