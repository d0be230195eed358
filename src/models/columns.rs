// src/models/columns.rs

//! Source CSV header → target column dictionaries.

use serde::{Deserialize, Serialize};

use crate::models::Category;

/// SQL type a target column is cast to on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Date,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "BIGINT",
            Self::Numeric => "NUMERIC",
            Self::Date => "DATE",
        }
    }
}

/// One entry of a column dictionary. An empty `target` drops the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub source: &'static str,
    pub target: &'static str,
    pub kind: ColumnType,
}

const fn text(source: &'static str, target: &'static str) -> ColumnSpec {
    ColumnSpec {
        source,
        target,
        kind: ColumnType::Text,
    }
}

const fn typed(source: &'static str, target: &'static str, kind: ColumnType) -> ColumnSpec {
    ColumnSpec {
        source,
        target,
        kind,
    }
}

const fn dropped(source: &'static str) -> ColumnSpec {
    text(source, "")
}

const LAND_FEATURE_COLUMNS: &[ColumnSpec] = &[
    text("고유번호", "pnu"),
    dropped("법정동코드"),
    text("법정동명", "address_jibun"),
    text("대장구분코드", "ledger_kind_code"),
    text("대장구분명", "ledger_kind_name"),
    text("지번", "bunji"),
    dropped("토지일련번호"),
    dropped("기준년도"),
    dropped("기준월"),
    text("지목코드", "land_category_code"),
    text("지목명", "land_category_name"),
    typed("토지면적", "land_area", ColumnType::Numeric),
    text("용도지역코드1", "land_use_code"),
    text("용도지역명1", "land_use_name"),
    text("용도지역코드2", "land_use_code2"),
    text("용도지역명2", "land_use_name2"),
    text("토지이용상황코드", "land_using_code"),
    text("토지이동상황", "land_using_name"),
    text("지형높이코드", "terrain_height_code"),
    text("지형높이", "terrain_height_name"),
    text("지형형상코드", "terrain_shape_code"),
    text("지형형상", "terrain_shape_name"),
    text("도로접면코드", "doro_neighbor_code"),
    text("도로접면", "doro_neighbor_name"),
    typed("공시지가", "land_declared_value", ColumnType::Integer),
    typed("데이터기준일자", "last_update_date", ColumnType::Date),
];

const LAND_USE_COLUMNS: &[ColumnSpec] = &[
    text("고유번호", "pnu"),
    dropped("관리번호"),
    dropped("법정동코드"),
    text("법정동명", "address_jibun"),
    text("대장구분코드", "ledger_kind_code"),
    text("대장구분명", "ledger_kind_name"),
    text("지번", "bunji"),
    dropped("도면번호"),
    text("저촉여부코드", "border_neighbor_code"),
    text("저촉여부", "border_neighbor_name"),
    text("용도지역지구코드", "land_use_code"),
    text("용도지역지구명", "land_use_name"),
    dropped("등록일자"),
    typed("데이터기준일자", "last_update_date", ColumnType::Date),
];

/// What to do with CSV headers that have no dictionary entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedColumns {
    #[default]
    Drop,
    PassThrough,
}

/// Static column dictionary for one category.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    category: Category,
    specs: &'static [ColumnSpec],
}

impl ColumnMap {
    pub fn for_category(category: Category) -> Self {
        let specs = match category {
            Category::LandUse => LAND_USE_COLUMNS,
            Category::LandFeature => LAND_FEATURE_COLUMNS,
        };
        Self { category, specs }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Dictionary entry for a source header.
    pub fn lookup(&self, header: &str) -> Option<&'static ColumnSpec> {
        self.specs.iter().find(|spec| spec.source == header)
    }

    /// Target name for a source header: `Some("")` means drop, `None` unmapped.
    pub fn target(&self, header: &str) -> Option<&'static str> {
        self.lookup(header).map(|spec| spec.target)
    }

    /// Kept target columns in dictionary order.
    pub fn columns(&self) -> impl Iterator<Item = &'static ColumnSpec> {
        self.specs.iter().filter(|spec| !spec.target.is_empty())
    }

    /// Cast for a target column; columns passed through unmapped are text.
    pub fn target_type(&self, target: &str) -> ColumnType {
        self.columns()
            .find(|spec| spec.target == target)
            .map(|spec| spec.kind)
            .unwrap_or(ColumnType::Text)
    }

    /// Table the category is loaded into.
    pub fn table(&self) -> &'static str {
        match self.category {
            Category::LandUse => "land_use",
            Category::LandFeature => "land_feature",
        }
    }

    /// Columns identifying a row for upsert.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self.category {
            Category::LandUse => &["pnu", "land_use_code"],
            Category::LandFeature => &["pnu"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_and_unmapped_headers() {
        let map = ColumnMap::for_category(Category::LandUse);
        assert_eq!(map.target("고유번호"), Some("pnu"));
        assert_eq!(map.target("관리번호"), Some(""));
        assert_eq!(map.target("없는컬럼"), None);
    }

    #[test]
    fn test_columns_skip_dropped_entries() {
        let map = ColumnMap::for_category(Category::LandUse);
        let targets: Vec<_> = map.columns().map(|spec| spec.target).collect();
        assert_eq!(
            targets,
            vec![
                "pnu",
                "address_jibun",
                "ledger_kind_code",
                "ledger_kind_name",
                "bunji",
                "border_neighbor_code",
                "border_neighbor_name",
                "land_use_code",
                "land_use_name",
                "last_update_date",
            ]
        );
    }

    #[test]
    fn test_natural_key_is_mapped() {
        for category in Category::ALL {
            let map = ColumnMap::for_category(category);
            for key in map.natural_key() {
                assert!(map.columns().any(|spec| spec.target == *key), "{key}");
            }
        }
    }

    #[test]
    fn test_target_types() {
        let map = ColumnMap::for_category(Category::LandFeature);
        assert_eq!(map.target_type("land_area"), ColumnType::Numeric);
        assert_eq!(map.target_type("land_declared_value"), ColumnType::Integer);
        assert_eq!(map.target_type("last_update_date"), ColumnType::Date);
        assert_eq!(map.target_type("unknown"), ColumnType::Text);
        assert_eq!(map.table(), "land_feature");
    }
}
