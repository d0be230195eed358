// src/pipeline/load.rs

//! ETL loader: crawl run artifacts into the relational store.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument, warn};

use crate::error::{AppError, Result};
use crate::models::{Category, ColumnMap, Config, Environment, StoreConfig, UnmappedColumns};
use crate::services::{Notifier, build_notifier, notify_best_effort};
use crate::storage::{self, BlobStore, PgRowStore, RowStore, RunId, entry_name, paths};
use crate::utils::{log, sanitize_file_name};

use super::archive::extract_single_csv;
use super::locate::{resolve_latest, run_walk};
use super::lock::RunLease;
use super::transform::{RowBatcher, TransformPlan};

const DELIMITER: &str = "/";

/// An archive selected for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArchive {
    pub category: Category,
    pub key: String,
}

/// Rows and batches written for one CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsvLoad {
    pub batches: usize,
    pub rows: usize,
}

/// Outcome of a loader run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub run_prefix: String,
    pub archives: usize,
    pub batches: usize,
    pub rows: usize,
}

/// Walks one crawl run and upserts every matching archive.
pub struct EtlLoader<'a> {
    blobs: &'a dyn BlobStore,
    rows: &'a dyn RowStore,
    notifier: &'a dyn Notifier,
    environment: Environment,
    store: &'a StoreConfig,
}

impl<'a> EtlLoader<'a> {
    pub fn new(
        blobs: &'a dyn BlobStore,
        rows: &'a dyn RowStore,
        notifier: &'a dyn Notifier,
        environment: Environment,
        store: &'a StoreConfig,
    ) -> Self {
        Self {
            blobs,
            rows,
            notifier,
            environment,
            store,
        }
    }

    /// Run the whole load: resolve, plan, then load archive by archive.
    #[instrument(skip(self), fields(env = %self.environment))]
    pub async fn run(&self, run_by: &str) -> Result<LoadSummary> {
        notify_best_effort(
            self.notifier,
            &format!("Load starting ({}, {run_by})", self.environment),
        )
        .await;

        let run_prefix = self.resolve_run_prefix().await?;
        info!(run_prefix = %run_prefix, "Resolved crawl run");

        let planned = self.plan(&run_prefix).await?;
        info!(archives = planned.len(), "Planned archives");

        let mut summary = LoadSummary {
            run_prefix,
            ..LoadSummary::default()
        };
        for archive in &planned {
            let loaded = self.load_archive(archive).await?;
            summary.archives += 1;
            summary.batches += loaded.batches;
            summary.rows += loaded.rows;
        }

        log::summary(
            "Load",
            &[
                ("run", summary.run_prefix.clone()),
                ("archives", summary.archives.to_string()),
                ("batches", summary.batches.to_string()),
                ("rows", summary.rows.to_string()),
            ],
        );
        notify_best_effort(
            self.notifier,
            &format!(
                "Load finished ({}, {run_by}): {} archives, {} rows",
                self.environment, summary.archives, summary.rows
            ),
        )
        .await;
        Ok(summary)
    }

    /// Prefix of the run to load: the configured run, or the latest one.
    pub async fn resolve_run_prefix(&self) -> Result<String> {
        match self
            .store
            .crawler_log_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        {
            Some(id) => Ok(RunId::from_timestamp(id)?.prefix(self.environment)),
            None => {
                let root = paths::environment_prefix(self.environment);
                resolve_latest(self.blobs, &root, &run_walk()).await
            }
        }
    }

    /// Every archive under the run that passes both region filters.
    ///
    /// Matching completes for all categories before anything is fetched.
    pub async fn plan(&self, run_prefix: &str) -> Result<Vec<PlannedArchive>> {
        let level_1 = region_regex("store.region_regex_level_1", &self.store.region_regex_level_1)?;
        let level_2 = region_regex("store.region_regex_level_2", &self.store.region_regex_level_2)?;

        let run = self.blobs.list(run_prefix, DELIMITER).await?;
        let mut sources = Vec::new();
        for category in Category::ALL {
            if !run
                .common_prefixes
                .contains(&format!("{run_prefix}{}{DELIMITER}", category.dataset_name()))
            {
                continue;
            }
            let data_prefix = format!(
                "{run_prefix}{}/{}/{}/",
                category.dataset_name(),
                paths::DATA_DIR,
                self.store.revision_type
            );
            // A category that collected nothing in this run only has its crawl log.
            if self.blobs.list(&data_prefix, DELIMITER).await?.common_prefixes.is_empty() {
                info!(%category, prefix = %data_prefix, "No archives for category; skipping");
                continue;
            }
            sources.push((category, data_prefix));
        }
        if sources.is_empty() {
            return Err(AppError::not_found(format!(
                "no dataset folders under {run_prefix}"
            )));
        }

        let mut planned = Vec::new();
        for (category, data_prefix) in sources {
            for province in self.matching(&data_prefix, &level_1).await? {
                for district in self.matching(&province, &level_2).await? {
                    let dates = self.blobs.list(&district, DELIMITER).await?;
                    for base_date in &dates.common_prefixes {
                        let objects = self.blobs.list(base_date, DELIMITER).await?;
                        planned.extend(
                            objects
                                .contents
                                .into_iter()
                                .filter(|key| key.to_ascii_lowercase().ends_with(".zip"))
                                .map(|key| PlannedArchive { category, key }),
                        );
                    }
                }
            }
        }
        Ok(planned)
    }

    /// Sub-folders of `prefix` whose name matches `pattern`.
    async fn matching(&self, prefix: &str, pattern: &Regex) -> Result<Vec<String>> {
        let listing = self.blobs.list(prefix, DELIMITER).await?;
        let matched: Vec<String> = listing
            .common_prefixes
            .into_iter()
            .filter(|p| pattern.is_match(entry_name(prefix, p)))
            .collect();
        if matched.is_empty() {
            return Err(AppError::region_not_found(format!(
                "no folder under {prefix} matches '{}'",
                pattern.as_str()
            )));
        }
        Ok(matched)
    }

    /// Fetch, extract, transform and upsert one archive.
    #[instrument(skip(self, archive), fields(category = %archive.category, key = %archive.key))]
    pub async fn load_archive(&self, archive: &PlannedArchive) -> Result<CsvLoad> {
        let work = tempfile::TempDir::new()?;
        let bytes = self.blobs.get(&archive.key).await?;
        let zip_path = work
            .path()
            .join(sanitize_file_name(archive.key.rsplit('/').next().unwrap_or_default()));
        tokio::fs::write(&zip_path, &bytes).await?;

        let csv_path = extract_single_csv(&zip_path, work.path())?;
        let loaded = load_csv(
            &csv_path,
            archive.category,
            self.store.unmapped_columns,
            self.store.batch_size,
            self.rows,
        )
        .await
        .map_err(into_store_error)?;

        info!(batches = loaded.batches, rows = loaded.rows, "Loaded archive");
        Ok(loaded)
    }
}

fn region_regex(key: &str, pattern: &Option<String>) -> Result<Regex> {
    let pattern = pattern
        .as_deref()
        .ok_or_else(|| AppError::config(format!("{key} is not set")))?;
    Ok(Regex::new(pattern)?)
}

fn into_store_error(e: AppError) -> AppError {
    match e {
        AppError::Store(_) => e,
        other => AppError::store(other),
    }
}

/// Stream a CSV through the column transform into `batch_size` upserts.
pub async fn load_csv(
    path: &Path,
    category: Category,
    unmapped: UnmappedColumns,
    batch_size: usize,
    rows: &dyn RowStore,
) -> Result<CsvLoad> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let plan = TransformPlan::new(
        reader.headers()?,
        &ColumnMap::for_category(category),
        unmapped,
    )?;

    let mut batcher = RowBatcher::new(batch_size);
    let mut loaded = CsvLoad::default();
    for record in reader.records() {
        if let Some(batch) = batcher.push(plan.apply(&record?)) {
            loaded.rows += upsert(rows, category, &plan, &batch, loaded.batches).await?;
            loaded.batches += 1;
        }
    }
    if let Some(batch) = batcher.finish() {
        loaded.rows += upsert(rows, category, &plan, &batch, loaded.batches).await?;
        loaded.batches += 1;
    }
    Ok(loaded)
}

async fn upsert(
    rows: &dyn RowStore,
    category: Category,
    plan: &TransformPlan,
    batch: &[Vec<String>],
    index: usize,
) -> Result<usize> {
    let written = rows.upsert_batch(category, plan.columns(), batch).await?;
    info!(%category, batch = index + 1, rows = batch.len(), written, "Upserted batch");
    Ok(written)
}

/// Load a crawl run under the single-flight lease.
pub async fn run_loader(config: &Config, run_by: &str) -> Result<LoadSummary> {
    config.validate_for_load()?;
    let _lease = RunLease::acquire(
        &config.lock.path,
        "load",
        Duration::from_secs(config.lock.ttl_secs),
    )?;
    load_unlocked(config, run_by).await
}

/// Load without taking the lease; the caller holds it.
pub(crate) async fn load_unlocked(config: &Config, run_by: &str) -> Result<LoadSummary> {
    let blobs = storage::open(&config.storage).await?;
    let rows = PgRowStore::connect(&config.store.database_url).await?;
    rows.migrate().await?;
    let notifier = build_notifier(&config.notify)?;

    let loader = EtlLoader::new(
        blobs.as_ref(),
        &rows,
        notifier.as_ref(),
        config.environment,
        &config.store,
    );
    loader.run(run_by).await.inspect_err(|e| {
        warn!(error = %e, "Load aborted");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::TempDir;

    use crate::pipeline::archive::tests::write_zip;
    use crate::services::LogNotifier;
    use crate::storage::{BlobListing, LocalBlobStore, UploadReceipt};

    /// Local store that counts object fetches.
    struct CountingStore {
        inner: LocalBlobStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn list(&self, prefix: &str, delimiter: &str) -> Result<BlobListing> {
            self.inner.list(prefix, delimiter).await
        }
        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<UploadReceipt> {
            self.inner.put(key, bytes, content_type).await
        }
        fn location(&self, key: &str) -> String {
            self.inner.location(key)
        }
    }

    #[derive(Default)]
    struct RecordingRows {
        batches: Mutex<Vec<(Category, Vec<String>, usize)>>,
    }

    #[async_trait]
    impl RowStore for RecordingRows {
        async fn upsert_batch(
            &self,
            category: Category,
            columns: &[String],
            rows: &[Vec<String>],
        ) -> Result<usize> {
            self.batches
                .lock()
                .unwrap()
                .push((category, columns.to_vec(), rows.len()));
            Ok(rows.len())
        }
    }

    struct FailingRows;

    #[async_trait]
    impl RowStore for FailingRows {
        async fn upsert_batch(&self, _: Category, _: &[String], _: &[Vec<String>]) -> Result<usize> {
            Err(AppError::Database(sqlx::Error::PoolClosed))
        }
    }

    fn run_id() -> RunId {
        RunId::at(Utc.with_ymd_and_hms(2023, 6, 30, 20, 0, 0).unwrap())
    }

    fn store_config(level_1: &str, level_2: &str) -> StoreConfig {
        StoreConfig {
            database_url: "postgres://unused".into(),
            crawler_log_id: Some(run_id().timestamp().to_string()),
            region_regex_level_1: Some(level_1.into()),
            region_regex_level_2: Some(level_2.into()),
            ..StoreConfig::default()
        }
    }

    fn land_feature_csv(rows: usize) -> Vec<u8> {
        let mut csv = String::from("고유번호,법정동코드,토지면적,데이터기준일자\n");
        for i in 0..rows {
            csv.push_str(&format!("{i:019},1111010100,12.5,2023-06-01\n"));
        }
        csv.into_bytes()
    }

    async fn seeded_store(tmp: &TempDir, regions: &[&str], csv_rows: usize) -> CountingStore {
        let store = CountingStore {
            inner: LocalBlobStore::new(tmp.path().join("blobs")),
            gets: AtomicUsize::new(0),
        };
        let zip_path = tmp.path().join("AL_11.zip");
        write_zip(&zip_path, &[("AL_11.csv", &land_feature_csv(csv_rows))]);
        let bytes = std::fs::read(&zip_path).unwrap();

        let run = run_id();
        for region in regions {
            let key = run.artifact_key(
                Environment::Local,
                Category::LandFeature,
                "전체데이터",
                region,
                NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                "AL_11.zip",
            );
            store.put(&key, bytes.clone(), "application/zip").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_region_mismatch_fails_before_any_download() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구", "부산광역시 중구"], 1).await;
        let rows = RecordingRows::default();
        let store = store_config("^서울", "^강남구$");
        let loader = EtlLoader::new(&blobs, &rows, &LogNotifier, Environment::Local, &store);

        let err = loader.run("DEVELOPER").await.unwrap_err();
        assert!(matches!(err, AppError::RegionNotFound(_)));
        assert_eq!(blobs.gets.load(Ordering::SeqCst), 0);
        assert!(rows.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_province_mismatch_is_region_not_found() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구"], 1).await;
        let rows = RecordingRows::default();
        let store = store_config("^제주", ".*");
        let loader = EtlLoader::new(&blobs, &rows, &LogNotifier, Environment::Local, &store);

        assert!(matches!(
            loader.run("DEVELOPER").await,
            Err(AppError::RegionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_skips_category_with_only_a_crawl_log() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구"], 3).await;
        let log = serde_json::json!({
            "time_stamp": run_id().timestamp(),
            "run_by": "SCHEDULER",
            "finish_time_stamp": run_id().timestamp(),
            "total_statistics": {"land_use_zip_count": 0, "land_feature_zip_count": 0},
            "region_date": [],
        });
        blobs
            .put(
                &run_id().log_key(Environment::Local, Category::LandUse),
                log.to_string().into_bytes(),
                "application/json",
            )
            .await
            .unwrap();
        let rows = RecordingRows::default();
        let store = store_config(".*", ".*");
        let loader = EtlLoader::new(&blobs, &rows, &LogNotifier, Environment::Local, &store);

        let planned = loader.plan(&run_id().prefix(Environment::Local)).await.unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].category, Category::LandFeature);

        let summary = loader.run("DEVELOPER").await.unwrap();
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.rows, 3);
    }

    #[tokio::test]
    async fn test_loads_matching_regions_in_batches() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구", "서울특별시 중구", "부산광역시 중구"], 10_001).await;
        let rows = RecordingRows::default();
        let store = store_config("^서울", "종로구");
        let loader = EtlLoader::new(&blobs, &rows, &LogNotifier, Environment::Local, &store);

        let summary = loader.run("DEVELOPER").await.unwrap();
        assert_eq!(summary.run_prefix, run_id().prefix(Environment::Local));
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.rows, 10_001);
        assert_eq!(blobs.gets.load(Ordering::SeqCst), 1);

        let batches = rows.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|(_, _, n)| *n).collect();
        assert_eq!(sizes, [10_000, 1]);
        assert_eq!(batches[0].0, Category::LandFeature);
        assert_eq!(batches[0].1, ["pnu", "land_area", "last_update_date"]);
    }

    #[tokio::test]
    async fn test_discovers_latest_run_without_explicit_id() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구"], 3).await;
        blobs
            .put("local/2022/01/01/1640995200.000000/marker", b"x".to_vec(), "text/plain")
            .await
            .unwrap();
        let rows = RecordingRows::default();
        let store = StoreConfig {
            crawler_log_id: None,
            ..store_config(".*", ".*")
        };
        let loader = EtlLoader::new(&blobs, &rows, &LogNotifier, Environment::Local, &store);

        assert_eq!(
            loader.resolve_run_prefix().await.unwrap(),
            run_id().prefix(Environment::Local)
        );
    }

    #[tokio::test]
    async fn test_row_store_failure_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let blobs = seeded_store(&tmp, &["서울특별시 종로구"], 3).await;
        let store = store_config(".*", ".*");
        let loader = EtlLoader::new(&blobs, &FailingRows, &LogNotifier, Environment::Local, &store);

        assert!(matches!(
            loader.run("DEVELOPER").await,
            Err(AppError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_load_csv_batches() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.csv");
        std::fs::write(&path, land_feature_csv(5)).unwrap();
        let rows = RecordingRows::default();

        let loaded = load_csv(&path, Category::LandFeature, UnmappedColumns::Drop, 2, &rows)
            .await
            .unwrap();
        assert_eq!(loaded, CsvLoad { batches: 3, rows: 5 });
    }
}
