//! Relational store for transformed rows.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{Category, ColumnMap};

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Transactional upsert-by-natural-key.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Upsert one batch inside a single transaction.
    ///
    /// Returns the number of rows written after de-duplication.
    async fn upsert_batch(
        &self,
        category: Category,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<usize>;
}

/// Postgres-backed row store.
#[derive(Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| AppError::store(format!("connecting to database: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the target tables if needed.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::store(format!("running migrations: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn upsert_batch(
        &self,
        category: Category,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<usize> {
        let map = ColumnMap::for_category(category);
        let rows = dedupe_by_key(&map, columns, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(AppError::store)?;
        let chunk_rows = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);
        for chunk in rows.chunks(chunk_rows) {
            let mut query = build_upsert(&map, columns, chunk);
            query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::store(format!("upserting into {}: {e}", map.table())))?;
        }
        tx.commit().await.map_err(AppError::store)?;

        debug!(table = map.table(), rows = rows.len(), "Committed batch");
        Ok(rows.len())
    }
}

/// Drop earlier rows sharing a natural key with a later one.
///
/// A single `INSERT .. ON CONFLICT` statement may not touch the same key
/// twice, so within a batch the last row wins.
pub(crate) fn dedupe_by_key<'a>(
    map: &ColumnMap,
    columns: &[String],
    rows: &'a [Vec<String>],
) -> Result<Vec<&'a Vec<String>>> {
    let key_idx = map
        .natural_key()
        .iter()
        .map(|key| {
            columns.iter().position(|c| c == key).ok_or_else(|| {
                AppError::store(format!("{} rows are missing key column '{key}'", map.table()))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut last: HashMap<Vec<&str>, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let key = key_idx
            .iter()
            .map(|&k| row.get(k).map(String::as_str).unwrap_or_default())
            .collect();
        last.insert(key, i);
    }

    let mut keep: Vec<usize> = last.into_values().collect();
    keep.sort_unstable();
    let skipped = rows.len() - keep.len();
    if skipped > 0 {
        info!(table = map.table(), skipped, "Dropped duplicate keys within batch");
    }
    Ok(keep.into_iter().map(|i| &rows[i]).collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `INSERT .. VALUES .. ON CONFLICT (key) DO UPDATE` for one chunk.
pub(crate) fn build_upsert<'a>(
    map: &ColumnMap,
    columns: &'a [String],
    rows: &[&'a Vec<String>],
) -> QueryBuilder<'a, Postgres> {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {} ({column_list}) ",
        quote_ident(map.table())
    ));

    let casts: Vec<&'static str> = columns
        .iter()
        .map(|c| map.target_type(c).sql_type())
        .collect();

    query.push_values(rows.iter(), |mut b, row| {
        for (i, cast) in casts.iter().enumerate() {
            let value = row
                .get(i)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            b.push_bind(value).push_unseparated(format!("::{cast}"));
        }
    });

    let keys = map.natural_key();
    let conflict = keys
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !keys.contains(&c.as_str()))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();

    if updates.is_empty() {
        query.push(format!(" ON CONFLICT ({conflict}) DO NOTHING"));
    } else {
        query.push(format!(
            " ON CONFLICT ({conflict}) DO UPDATE SET {}",
            updates.join(", ")
        ));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedupe_keeps_last_row_per_key() {
        let map = ColumnMap::for_category(Category::LandUse);
        let columns = cols(&["pnu", "land_use_code", "land_use_name"]);
        let rows = vec![
            row(&["1", "UQA", "old"]),
            row(&["1", "UQB", "other"]),
            row(&["1", "UQA", "new"]),
        ];
        let kept = dedupe_by_key(&map, &columns, &rows).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0][2], "other");
        assert_eq!(kept[1][2], "new");
    }

    #[test]
    fn test_dedupe_requires_key_columns() {
        let map = ColumnMap::for_category(Category::LandUse);
        let columns = cols(&["pnu", "land_use_name"]);
        let rows = vec![row(&["1", "x"])];
        assert!(matches!(
            dedupe_by_key(&map, &columns, &rows),
            Err(AppError::Store(_))
        ));
    }

    #[test]
    fn test_build_upsert_sql() {
        let map = ColumnMap::for_category(Category::LandFeature);
        let columns = cols(&["pnu", "land_area", "last_update_date"]);
        let rows = vec![row(&["1111010100100010000", "12.5", "2023-06-01"])];
        let refs: Vec<_> = rows.iter().collect();
        let query = build_upsert(&map, &columns, &refs);
        let sql = query.sql();

        assert!(sql.starts_with(
            r#"INSERT INTO "land_feature" ("pnu", "land_area", "last_update_date") VALUES"#
        ));
        assert!(sql.contains("$1::TEXT, $2::NUMERIC, $3::DATE"));
        assert!(sql.ends_with(
            r#"ON CONFLICT ("pnu") DO UPDATE SET "land_area" = EXCLUDED."land_area", "last_update_date" = EXCLUDED."last_update_date""#
        ));
    }

    #[test]
    fn test_build_upsert_keys_only() {
        let map = ColumnMap::for_category(Category::LandFeature);
        let columns = cols(&["pnu"]);
        let rows = vec![row(&["1"])];
        let refs: Vec<_> = rows.iter().collect();
        let query = build_upsert(&map, &columns, &refs);
        assert!(query.sql().ends_with(r#"ON CONFLICT ("pnu") DO NOTHING"#));
    }
}
