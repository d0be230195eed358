//! AWS Lambda entry point for landsync
//!
//! Deploy with `cargo lambda build --release --features lambda`
//! Invoke with `{"stage": "crawl" | "load" | "pipeline"}`.

use lambda_runtime::{Error as LambdaError, service_fn};
use tracing::info;

use landsync::lambda::handler;
use landsync::models::LoggingConfig;
use landsync::utils::log;

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    log::init(&LoggingConfig {
        json: true,
        ..LoggingConfig::default()
    });

    info!("landsync Lambda starting");
    lambda_runtime::run(service_fn(handler)).await
}
