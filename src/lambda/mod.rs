// src/lambda/mod.rs

//! AWS Lambda handler for scheduled runs.
//!
//! The event names a stage:
//! 1. `crawl` collects new revisions into the blob store
//! 2. `load` loads a crawl run (explicit or latest) into the database
//! 3. `pipeline` does both for the run just crawled

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config;
use crate::error::Result;
use crate::pipeline::{run_crawler, run_loader, run_pipeline};

/// Initiator recorded in crawl logs for scheduled runs.
pub const RUN_BY: &str = "SCHEDULER";

/// Stage to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Crawl,
    Load,
    Pipeline,
}

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct StageRequest {
    #[serde(default)]
    pub stage: Stage,

    /// Run timestamp to load instead of the latest run
    pub crawler_log_id: Option<String>,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct StageResponse {
    pub success: bool,

    pub stage: Stage,

    /// Timestamp of the crawl run produced or loaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Archives collected by the crawl
    pub zips: u64,

    /// Rows upserted by the load
    pub rows: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub execution_time_ms: u64,
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(
    event: LambdaEvent<StageRequest>,
) -> std::result::Result<StageResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();

    info!(stage = ?request.stage, crawler_log_id = ?request.crawler_log_id, "Starting stage");

    match run_stage(&request).await {
        Ok(mut response) => {
            response.success = true;
            response.execution_time_ms = start.elapsed().as_millis() as u64;
            info!(
                stage = ?response.stage,
                zips = response.zips,
                rows = response.rows,
                ms = response.execution_time_ms,
                "Stage completed"
            );
            Ok(response)
        }
        Err(e) => {
            error!(stage = ?request.stage, error = %e, "Stage failed");
            Ok(StageResponse {
                stage: request.stage,
                error: Some(e.to_string()),
                execution_time_ms: start.elapsed().as_millis() as u64,
                ..Default::default()
            })
        }
    }
}

async fn run_stage(request: &StageRequest) -> Result<StageResponse> {
    let mut config = config::from_env()?;
    if let Some(id) = request.crawler_log_id.as_deref().filter(|id| !id.trim().is_empty()) {
        config.store.crawler_log_id = Some(id.to_string());
    }

    let mut response = StageResponse {
        stage: request.stage,
        ..Default::default()
    };
    match request.stage {
        Stage::Crawl => {
            let crawl = run_crawler(&config, RUN_BY).await?;
            response.run_id = Some(crawl.run_id.timestamp().to_string());
            response.zips = crawl.totals.total();
        }
        Stage::Load => {
            let load = run_loader(&config, RUN_BY).await?;
            response.run_id = load.run_prefix.rsplit('/').nth(1).map(str::to_string);
            response.rows = load.rows;
        }
        Stage::Pipeline => {
            let summary = run_pipeline(&config, RUN_BY).await?;
            response.run_id = Some(summary.crawl.run_id.timestamp().to_string());
            response.zips = summary.crawl.totals.total();
            response.rows = summary.load.map(|l| l.rows).unwrap_or_default();
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_request_defaults() {
        let req: StageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.stage, Stage::Crawl);
        assert!(req.crawler_log_id.is_none());
    }

    #[test]
    fn test_stage_request_with_run() {
        let json = r#"{"stage": "load", "crawler_log_id": "1688155200.000000"}"#;
        let req: StageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.stage, Stage::Load);
        assert_eq!(req.crawler_log_id.as_deref(), Some("1688155200.000000"));
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        assert!(serde_json::from_str::<StageRequest>(r#"{"stage": "map"}"#).is_err());
    }

    #[test]
    fn test_failed_response_omits_run_id() {
        let response = StageResponse {
            stage: Stage::Pipeline,
            error: Some("boom".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stage"], "pipeline");
        assert_eq!(json["success"], false);
        assert!(json.get("run_id").is_none());
    }
}
