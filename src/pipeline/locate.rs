// src/pipeline/locate.rs

//! Latest-run discovery over a delimited blob store.
//!
//! Run folders are named so that lexicographic order is chronological
//! order, so "latest" is the maximal entry at every level.

use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::Category;
use crate::storage::{BlobStore, entry_name, paths};

const DELIMITER: &str = "/";

/// One level of a discovery walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStep {
    /// Descend into the greatest sub-directory.
    Latest,
    /// Descend into a sub-directory with a known name.
    Fixed(String),
    /// Select the greatest object; must be the final step.
    LatestObject,
}

/// year → month → day → run timestamp.
pub fn run_walk() -> Vec<WalkStep> {
    vec![WalkStep::Latest; 4]
}

/// year → month → day → run timestamp → category → log object.
pub fn crawl_log_walk(category: Category) -> Vec<WalkStep> {
    let mut steps = run_walk();
    steps.push(WalkStep::Fixed(category.dataset_name().to_string()));
    steps.push(WalkStep::Fixed(paths::CRAWLER_LOG_DIR.to_string()));
    steps.push(WalkStep::LatestObject);
    steps
}

/// Resolve the latest key under `root_prefix` following `steps`.
///
/// Every call lists the store afresh. An empty level fails with
/// `AppError::LogDiscovery`.
pub async fn resolve_latest(
    store: &dyn BlobStore,
    root_prefix: &str,
    steps: &[WalkStep],
) -> Result<String> {
    let mut current = with_delimiter(root_prefix);

    for (depth, step) in steps.iter().enumerate() {
        let listing = store.list(&current, DELIMITER).await?;

        current = match step {
            WalkStep::Latest => listing
                .common_prefixes
                .iter()
                .max()
                .cloned()
                .ok_or_else(|| AppError::log_discovery(&current, "no entries at this level"))?,
            WalkStep::Fixed(name) => {
                let wanted = format!("{current}{name}{DELIMITER}");
                if !listing.common_prefixes.contains(&wanted) {
                    return Err(AppError::log_discovery(
                        &current,
                        format!("no '{name}' entry"),
                    ));
                }
                wanted
            }
            WalkStep::LatestObject => {
                if depth + 1 != steps.len() {
                    return Err(AppError::validation(
                        "an object step must end the discovery walk",
                    ));
                }
                listing
                    .contents
                    .iter()
                    .filter(|key| !entry_name(&current, key).is_empty())
                    .max()
                    .cloned()
                    .ok_or_else(|| AppError::log_discovery(&current, "no objects at this level"))?
            }
        };
        debug!(depth, resolved = %current, "Discovery step");
    }

    Ok(current)
}

fn with_delimiter(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(DELIMITER) {
        prefix.to_string()
    } else {
        format!("{prefix}{DELIMITER}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use tempfile::TempDir;

    async fn store_with(keys: &[&str]) -> (TempDir, LocalBlobStore) {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        for key in keys {
            store.put(key, b"{}".to_vec(), "application/json").await.unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn test_resolves_maximum_at_each_level() {
        let (_tmp, store) = store_with(&[
            "local/2023/12/31/1704000000.000000/x",
            "local/2024/01/05/1704400000.000000/x",
            "local/2024/02/01/1706700000.000000/x",
            "local/2024/02/01/1706790000.000000/x",
            "local/2024/11/01/1730400000.000000/x",
        ])
        .await;

        let resolved = resolve_latest(&store, "local", &run_walk()).await.unwrap();
        assert_eq!(resolved, "local/2024/11/01/1730400000.000000/");
    }

    #[tokio::test]
    async fn test_resolves_crawl_log_key() {
        let (_tmp, store) = store_with(&[
            "local/2024/02/01/1706790000.000000/토지특성정보/crawler-log/1706790000.000000.json",
            "local/2024/02/01/1706790000.000000/토지이용계획정보/crawler-log/1706790000.000000.json",
            "local/2024/02/01/1706790000.000000/토지이용계획정보/data/전체데이터/서울특별시/ALL/base_date_2024-01-01/a.zip",
        ])
        .await;

        let resolved = resolve_latest(&store, "local/", &crawl_log_walk(Category::LandUse))
            .await
            .unwrap();
        assert_eq!(
            resolved,
            "local/2024/02/01/1706790000.000000/토지이용계획정보/crawler-log/1706790000.000000.json"
        );
    }

    #[tokio::test]
    async fn test_empty_level_is_log_discovery_error() {
        let (_tmp, store) = store_with(&[]).await;
        let err = resolve_latest(&store, "local/", &run_walk()).await.unwrap_err();
        assert!(matches!(err, AppError::LogDiscovery { ref prefix, .. } if prefix == "local/"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_latest_run_without_category_log_fails() {
        // The newest run only collected the other category.
        let (_tmp, store) = store_with(&[
            "local/2024/01/01/1704067200.000000/토지이용계획정보/crawler-log/1704067200.000000.json",
            "local/2024/02/01/1706745600.000000/토지특성정보/crawler-log/1706745600.000000.json",
        ])
        .await;

        let err = resolve_latest(&store, "local/", &crawl_log_walk(Category::LandUse))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LogDiscovery { .. }));
    }
}
