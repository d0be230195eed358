// src/models/revision.rs

//! Listing rows published by the portal.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::Markup;

/// Dataset kinds tracked by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    LandUse,
    LandFeature,
}

impl Category {
    /// Crawl order.
    pub const ALL: [Category; 2] = [Category::LandUse, Category::LandFeature];

    /// Dataset name as printed in the listing; also the storage folder name.
    pub fn dataset_name(&self) -> &'static str {
        match self {
            Category::LandUse => "토지이용계획정보",
            Category::LandFeature => "토지특성정보",
        }
    }

    pub fn from_dataset_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.dataset_name() == name.trim())
    }

    /// Short ASCII name for logs and CLI output.
    pub fn slug(&self) -> &'static str {
        match self {
            Category::LandUse => "land-use",
            Category::LandFeature => "land-feature",
        }
    }

    /// Providing organisation code.
    pub fn provider(&self) -> &'static str {
        match self {
            Category::LandUse => "NIDO",
            Category::LandFeature => "SCOS",
        }
    }

    /// Portal service identifier.
    pub fn service_id(&self) -> &'static str {
        match self {
            Category::LandUse => "F014",
            Category::LandFeature => "F024",
        }
    }

    /// Service section code, shared by both categories.
    pub fn service_section(&self) -> &'static str {
        "F"
    }

    /// Whether the listing accepts the extraction qualifier filter.
    pub fn accepts_qualifier(&self) -> bool {
        matches!(self, Category::LandUse)
    }

    /// Whether child (district-level) regions get their own watermark.
    pub fn tracks_child_regions(&self) -> bool {
        matches!(self, Category::LandFeature)
    }

    /// The other tracked category.
    pub fn other(&self) -> Self {
        match self {
            Category::LandUse => Category::LandFeature,
            Category::LandFeature => Category::LandUse,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Parameters of one listing search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub category: Category,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `AL` for full extracts, `CH` for change sets
    pub qualifier: String,
}

impl ListingQuery {
    /// Form fields for the listing request.
    pub fn form(&self, page_index: u32) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("svcSe", self.category.service_section().to_string()),
            ("svcId", self.category.service_id().to_string()),
            ("pageIndex", "1".to_string()),
            ("provOrg", self.category.provider().to_string()),
            ("startDate", self.start_date.format("%Y-%m-%d").to_string()),
            ("endDate", self.end_date.format("%Y-%m-%d").to_string()),
            ("doArea", String::new()),
            ("svcNmSearch", String::new()),
            ("pageIndexSecond", page_index.max(1).to_string()),
        ];
        if self.category.accepts_qualifier() {
            form.push(("extrcSeSearch", self.qualifier.clone()));
        }
        form
    }
}

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"](.*?)['"]"#).expect("valid quoted-token regex"));

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid digits regex"));

/// Fields needed to request an archive, read from a row's download button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadToken {
    pub service_id: String,
    pub extraction_date: String,
    pub extraction_qualifier: String,
    pub extraction_scope: String,
    pub file_name: String,
    pub operation_seq: String,
    raw: String,
}

impl DownloadToken {
    /// Form fields for the download request.
    pub fn form(&self, provider: &str) -> Vec<(&'static str, String)> {
        vec![
            ("opertSnDialog", self.operation_seq.clone()),
            ("fileNmDialog", self.file_name.clone()),
            ("extrcScopeDialog", self.extraction_scope.clone()),
            ("extrcSeDialog", self.extraction_qualifier.clone()),
            ("extrcDtDialog", self.extraction_date.clone()),
            ("svcIdDialog", self.service_id.clone()),
            ("checkedValue", String::new()),
            ("downloadFileTy", String::new()),
            ("provOrg", provider.to_string()),
        ]
    }
}

impl Markup for DownloadToken {
    fn render(&self) -> String {
        self.raw.clone()
    }

    /// Parse the `onclick` value, e.g. `fn('F014','20200908','CH','00','CH_00_D155_20200908.zip','2448')`.
    fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = QUOTED
            .captures_iter(raw)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        if fields.len() < 6 {
            return Err(AppError::parse(format!(
                "download token has {} fields, expected 6: {raw}",
                fields.len()
            )));
        }

        Ok(Self {
            service_id: fields[0].to_string(),
            extraction_date: fields[1].to_string(),
            extraction_qualifier: fields[2].to_string(),
            extraction_scope: fields[3].to_string(),
            file_name: fields[4].to_string(),
            operation_seq: fields[5].to_string(),
            raw: raw.to_string(),
        })
    }
}

/// One row of the listing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    /// Full extract or change set (`전체데이터`, `변동데이터`)
    pub revision_type: String,
    /// Region display name, e.g. `서울특별시 종로구`
    pub region_name: String,
    pub dataset_name: String,
    pub revision_date: NaiveDate,
    /// Display string such as `3,527 KB`
    pub file_size: String,
    pub download_token: DownloadToken,
    raw: String,
}

impl RevisionRecord {
    /// Recognized category of this row, if any.
    pub fn category(&self) -> Option<Category> {
        Category::from_dataset_name(&self.dataset_name)
    }

    fn from_element(tr: &ElementRef<'_>) -> Result<Self> {
        let cells: Vec<ElementRef<'_>> = tr.select(&TD).collect();
        if cells.len() < 6 {
            return Err(AppError::parse(format!(
                "listing row has {} cells, expected 6",
                cells.len()
            )));
        }

        let text = |i: usize| cells[i].text().collect::<String>().trim().to_string();
        let raw_date = text(3);
        let revision_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
            .map_err(|e| AppError::parse(format!("invalid revision date '{raw_date}': {e}")))?;

        let onclick = cells[5]
            .select(&BUTTON)
            .next()
            .and_then(|b| b.value().attr("onclick"))
            .ok_or_else(|| AppError::parse("listing row has no download button"))?;

        Ok(Self {
            revision_type: text(0),
            region_name: text(1),
            dataset_name: text(2),
            revision_date,
            file_size: text(4),
            download_token: DownloadToken::parse(onclick)?,
            raw: tr.html(),
        })
    }
}

impl Markup for RevisionRecord {
    fn render(&self) -> String {
        self.raw.clone()
    }

    fn parse(raw: &str) -> Result<Self> {
        let fragment = Html::parse_fragment(&format!("<table><tbody>{raw}</tbody></table>"));
        let tr = fragment
            .select(&TR)
            .next()
            .ok_or_else(|| AppError::parse("no <tr> in listing row markup"))?;
        Self::from_element(&tr)
    }
}

/// One page of the listing with its pagination total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub rows: Vec<RevisionRecord>,
    pub total_pages: u32,
    raw: String,
}

impl ListingPage {
    /// An empty result page.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.total_pages == 0
    }
}

impl Markup for ListingPage {
    fn render(&self) -> String {
        self.raw.clone()
    }

    /// Parse a full listing document.
    ///
    /// A page without the listing table is malformed. A table with no data
    /// rows and no pagination control is an empty result.
    fn parse(raw: &str) -> Result<Self> {
        let document = Html::parse_document(raw);
        let tbody = document
            .select(&TBODY)
            .next()
            .ok_or_else(|| AppError::parse("listing table not found"))?;

        // "No data" placeholder rows carry a single spanning cell.
        let rows = tbody
            .select(&TR)
            .filter(|tr| tr.select(&TD).count() >= 6)
            .map(|tr| RevisionRecord::from_element(&tr))
            .collect::<Result<Vec<_>>>()?;

        let last_button = document
            .select(&LAST_PAGE)
            .next()
            .and_then(|b| b.value().attr("onclick"));

        let total_pages = match last_button {
            Some(onclick) => DIGITS
                .find(onclick)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .ok_or_else(|| {
                    AppError::parse(format!("pagination control has no page number: {onclick}"))
                })?,
            None if rows.is_empty() => 0,
            None => return Err(AppError::parse("pagination control not found")),
        };

        Ok(Self {
            rows,
            total_pages,
            raw: raw.to_string(),
        })
    }
}

static TBODY: LazyLock<Selector> = LazyLock::new(|| selector("#fileListForm > table > tbody"));
static TR: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static BUTTON: LazyLock<Selector> = LazyLock::new(|| selector("button"));
static LAST_PAGE: LazyLock<Selector> = LazyLock::new(|| selector("button.btn-last"));

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static selector is valid")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn row_html(region: &str, dataset: &str, date: &str, file: &str) -> String {
        format!(
            "<tr><td>전체데이터</td><td>{region}</td><td>{dataset}</td><td>{date}</td>\
             <td>3,527 KB</td><td><button type=\"button\" \
             onclick=\"fn_download('F014','20200908','AL','00','{file}','2448')\">다운로드</button></td></tr>"
        )
    }

    pub(crate) fn page_html(rows: &[String], total_pages: Option<u32>) -> String {
        let pagination = total_pages
            .map(|n| format!("<button class=\"btn-last\" onclick=\"fn_egov_link_page({n});\">끝</button>"))
            .unwrap_or_default();
        format!(
            "<html><body><form id=\"fileListForm\"><table><tbody>{}</tbody></table></form>\
             <div class=\"paging\">{pagination}</div></body></html>",
            rows.join("")
        )
    }

    #[test]
    fn test_category_names() {
        assert_eq!(
            Category::from_dataset_name("토지특성정보"),
            Some(Category::LandFeature)
        );
        assert_eq!(Category::from_dataset_name(" 토지이용계획정보 "), Some(Category::LandUse));
        assert_eq!(Category::from_dataset_name("개별공시지가정보"), None);
        assert_eq!(Category::LandUse.other(), Category::LandFeature);
    }

    #[test]
    fn test_download_token_field_order() {
        let token =
            DownloadToken::parse("fn_download('F014','20200908','CH','00','CH_00_D155.zip','2448')")
                .unwrap();
        assert_eq!(token.service_id, "F014");
        assert_eq!(token.extraction_date, "20200908");
        assert_eq!(token.extraction_qualifier, "CH");
        assert_eq!(token.extraction_scope, "00");
        assert_eq!(token.file_name, "CH_00_D155.zip");
        assert_eq!(token.operation_seq, "2448");
    }

    #[test]
    fn test_download_token_too_short() {
        let err = DownloadToken::parse("fn_download('F014','20200908')").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_parse_row() {
        let html = row_html("서울특별시 종로구", "토지특성정보", "2023-03-02", "AL_11110.zip");
        let row = RevisionRecord::parse(&html).unwrap();
        assert_eq!(row.revision_type, "전체데이터");
        assert_eq!(row.region_name, "서울특별시 종로구");
        assert_eq!(row.category(), Some(Category::LandFeature));
        assert_eq!(row.revision_date, NaiveDate::from_ymd_opt(2023, 3, 2).unwrap());
        assert_eq!(row.file_size, "3,527 KB");
        assert_eq!(row.download_token.file_name, "AL_11110.zip");
        assert!(row.render().contains("AL_11110.zip"));
    }

    #[test]
    fn test_parse_page() {
        let rows = vec![
            row_html("서울특별시", "토지이용계획정보", "2023-01-01", "a.zip"),
            row_html("부산광역시", "토지이용계획정보", "2023-01-02", "b.zip"),
        ];
        let page = ListingPage::parse(&page_html(&rows, Some(22))).unwrap();
        assert_eq!(page.total_pages, 22);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[1].region_name, "부산광역시");
    }

    #[test]
    fn test_parse_page_without_table_is_parse_error() {
        let err = ListingPage::parse("<html><body><p>점검중</p></body></html>").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_parse_page_rows_without_pagination_is_parse_error() {
        let rows = vec![row_html("서울특별시", "토지이용계획정보", "2023-01-01", "a.zip")];
        let err = ListingPage::parse(&page_html(&rows, None)).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_parse_empty_result_page() {
        let rows = vec!["<tr><td colspan=\"6\">데이터가 없습니다.</td></tr>".to_string()];
        let page = ListingPage::parse(&page_html(&rows, None)).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_query_form_qualifier_only_for_land_use() {
        let query = ListingQuery {
            category: Category::LandFeature,
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2023, 7, 2).unwrap(),
            qualifier: "AL".to_string(),
        };
        let form = query.form(3);
        assert!(form.iter().all(|(k, _)| *k != "extrcSeSearch"));
        assert!(form.contains(&("pageIndexSecond", "3".to_string())));
        assert!(form.contains(&("startDate", "2019-01-01".to_string())));

        let land_use = ListingQuery {
            category: Category::LandUse,
            ..query
        };
        assert!(land_use.form(1).contains(&("extrcSeSearch", "AL".to_string())));
    }
}
