// src/services/regions.rs

//! Administrative region directory.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{Category, Region};
use crate::services::RegionSource;
use crate::utils::http::HttpClient;

const ENTRY_PATH: &str = "/nsdi/eios/OpenapiList.do";
const DETAIL_PATH: &str = "/nsdi/eios/ServiceDetail.do";
const REGIONS_PATH: &str = "/nsdi/eios/service/rest/AdmService/admCodeList.json";
const CHILD_REGIONS_PATH: &str = "/nsdi/eios/service/rest/AdmService/admSiList.json";

/// Region lookups against the portal's JSON endpoints.
///
/// The endpoints only answer within a session that has visited the
/// category's service page, sent back as `Referer`.
pub struct RegionDirectory {
    http: Arc<HttpClient>,
    referer: Mutex<Option<String>>,
}

impl RegionDirectory {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            referer: Mutex::new(None),
        }
    }

    fn referer(&self) -> Option<String> {
        self.referer.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl RegionSource for RegionDirectory {
    async fn prepare(&self, category: Category) -> Result<()> {
        let provider = category.provider();
        self.http
            .get_text(ENTRY_PATH, &[("provOrg", provider), ("gubun", "F")])
            .await?;
        let (_, url) = self
            .http
            .get_text(
                DETAIL_PATH,
                &[
                    ("svcSe", category.service_section()),
                    ("svcId", category.service_id()),
                ],
            )
            .await?;

        debug!(category = %category, referer = %url, "Primed portal session");
        if let Ok(mut referer) = self.referer.lock() {
            *referer = Some(url.to_string());
        }
        Ok(())
    }

    async fn fetch_regions(&self) -> Result<Vec<Region>> {
        let body = self
            .http
            .get_json(REGIONS_PATH, &[], self.referer().as_deref())
            .await?;
        parse_region_list(body)
    }

    async fn fetch_child_regions(&self, code: &str) -> Result<Vec<Region>> {
        let body = self
            .http
            .get_json(
                CHILD_REGIONS_PATH,
                &[("admCode", code)],
                self.referer().as_deref(),
            )
            .await?;
        Ok(parse_region_list(body)?
            .into_iter()
            .map(|r| r.with_parent(code))
            .collect())
    }
}

/// Read `admVOList.admVOList` from a region response.
fn parse_region_list(mut body: Value) -> Result<Vec<Region>> {
    let list = body
        .get_mut("admVOList")
        .and_then(|v| v.get_mut("admVOList"))
        .map(Value::take)
        .ok_or_else(|| AppError::parse("region response has no admVOList.admVOList"))?;

    match list {
        Value::Array(items) => items.into_iter().map(Region::from_value).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(AppError::parse(format!(
            "admVOList.admVOList is not a list: {other}"
        ))),
    }
}
