// src/models/region.rs

//! Administrative regions used to key watermarks.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Markup;

/// Renamed districts: (deprecated name, current name).
const REGION_ALIASES: &[(&str, &str)] = &[("인천광역시 남구", "인천광역시 미추홀구")];

/// Map a listing region name to its watermark key.
pub fn canonical_region(name: &str) -> &str {
    let name = name.trim();
    REGION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

/// A province- or district-level region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "admCode")]
    pub code: String,

    #[serde(rename = "admCodeNm")]
    pub name: String,

    /// Set for district-level regions
    #[serde(rename = "parentCode", default, skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,
}

impl Region {
    /// Attach the province code to a district-level region.
    pub fn with_parent(mut self, parent_code: impl Into<String>) -> Self {
        self.parent_code = Some(parent_code.into());
        self
    }

    /// Whether this is a top-tier region.
    pub fn is_province(&self) -> bool {
        self.parent_code.is_none()
    }

    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self> {
        let mut region: Region = serde_json::from_value(value)?;
        region.name = region.name.trim().to_string();
        if region.name.is_empty() {
            return Err(AppError::parse(format!(
                "region {} has an empty name",
                region.code
            )));
        }
        Ok(region)
    }
}

impl Markup for Region {
    fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn parse(raw: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(raw)?)
    }
}
