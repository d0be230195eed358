// src/pipeline/transform.rs

//! CSV column transform and row batching.

use std::collections::HashSet;

use csv::StringRecord;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::{ColumnMap, UnmappedColumns};

/// Column projection computed once from a file's header row.
#[derive(Debug, Clone)]
pub struct TransformPlan {
    columns: Vec<String>,
    sources: Vec<usize>,
}

impl TransformPlan {
    /// Build the projection for `headers`.
    ///
    /// Mapped headers are renamed, headers mapped to an empty target are
    /// dropped, and unmapped headers follow `unmapped`. Output columns keep
    /// the header order.
    pub fn new(headers: &StringRecord, map: &ColumnMap, unmapped: UnmappedColumns) -> Result<Self> {
        let mut columns = Vec::new();
        let mut sources = Vec::new();

        for (index, raw) in headers.iter().enumerate() {
            let header = raw.trim_start_matches('\u{feff}').trim();
            let target = match map.target(header) {
                Some("") => continue,
                Some(target) => target.to_string(),
                None => match unmapped {
                    UnmappedColumns::Drop => {
                        warn!(table = map.table(), header, "Dropping unmapped column");
                        continue;
                    }
                    UnmappedColumns::PassThrough => {
                        warn!(table = map.table(), header, "Passing unmapped column through");
                        header.to_string()
                    }
                },
            };
            columns.push(target);
            sources.push(index);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(AppError::store(format!(
                "{} header maps two columns onto '{dup}'",
                map.table()
            )));
        }
        if columns.is_empty() {
            return Err(AppError::store(format!(
                "no {} columns in CSV header",
                map.table()
            )));
        }

        Ok(Self { columns, sources })
    }

    /// Output column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Project one record; short records yield empty values.
    pub fn apply(&self, record: &StringRecord) -> Vec<String> {
        self.sources
            .iter()
            .map(|&i| record.get(i).unwrap_or_default().trim().to_string())
            .collect()
    }
}

/// Accumulates rows into fixed-size batches.
#[derive(Debug)]
pub struct RowBatcher {
    size: usize,
    rows: Vec<Vec<String>>,
}

impl RowBatcher {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            rows: Vec::with_capacity(size),
        }
    }

    /// Add a row, returning a full batch once `size` rows are held.
    pub fn push(&mut self, row: Vec<String>) -> Option<Vec<Vec<String>>> {
        self.rows.push(row);
        if self.rows.len() >= self.size {
            Some(std::mem::replace(
                &mut self.rows,
                Vec::with_capacity(self.size),
            ))
        } else {
            None
        }
    }

    /// The trailing partial batch, if any.
    pub fn finish(self) -> Option<Vec<Vec<String>>> {
        (!self.rows.is_empty()).then_some(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_plan_renames_and_drops() {
        let map = ColumnMap::for_category(Category::LandUse);
        let headers = record(&["\u{feff}고유번호", "관리번호", "용도지역지구코드", "데이터기준일자"]);
        let plan = TransformPlan::new(&headers, &map, UnmappedColumns::Drop).unwrap();

        assert_eq!(plan.columns(), ["pnu", "land_use_code", "last_update_date"]);
        let row = plan.apply(&record(&["1111010100100010000", "42", "UQA111", " 2023-06-01 "]));
        assert_eq!(row, ["1111010100100010000", "UQA111", "2023-06-01"]);
    }

    #[test]
    fn test_unmapped_policy() {
        let map = ColumnMap::for_category(Category::LandFeature);
        let headers = record(&["고유번호", "비고"]);

        let dropped = TransformPlan::new(&headers, &map, UnmappedColumns::Drop).unwrap();
        assert_eq!(dropped.columns(), ["pnu"]);

        let passed = TransformPlan::new(&headers, &map, UnmappedColumns::PassThrough).unwrap();
        assert_eq!(passed.columns(), ["pnu", "비고"]);
        assert_eq!(passed.apply(&record(&["1", "memo"])), ["1", "memo"]);
    }

    #[test]
    fn test_short_record_yields_empty_values() {
        let map = ColumnMap::for_category(Category::LandFeature);
        let plan =
            TransformPlan::new(&record(&["고유번호", "토지면적"]), &map, UnmappedColumns::Drop)
                .unwrap();
        assert_eq!(plan.apply(&record(&["1"])), ["1", ""]);
    }

    #[test]
    fn test_header_without_known_columns_fails() {
        let map = ColumnMap::for_category(Category::LandUse);
        let err = TransformPlan::new(&record(&["a", "b"]), &map, UnmappedColumns::Drop).unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
    }

    #[test]
    fn test_batcher_splits_at_size() {
        let mut batcher = RowBatcher::new(10_000);
        let mut batches = Vec::new();
        for i in 0..10_001 {
            if let Some(batch) = batcher.push(vec![i.to_string()]) {
                batches.push(batch.len());
            }
        }
        if let Some(rest) = batcher.finish() {
            batches.push(rest.len());
        }
        assert_eq!(batches, [10_000, 1]);
    }

    #[test]
    fn test_batcher_exact_multiple_has_no_tail() {
        let mut batcher = RowBatcher::new(2);
        assert!(batcher.push(vec![]).is_none());
        assert_eq!(batcher.push(vec![]).map(|b| b.len()), Some(2));
        assert!(batcher.finish().is_none());
    }
}
