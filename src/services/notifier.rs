// src/services/notifier.rs

//! Run summary notifications.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::NotifyConfig;

/// Informational message sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Posts `{"text": message}` to an incoming webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Writes messages to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(target: "notify", "{message}");
        Ok(())
    }
}

/// Webhook notifier when configured, log-only otherwise.
pub fn from_config(config: &NotifyConfig) -> Result<Box<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(WebhookNotifier::new(url)?)),
        _ => Ok(Box::new(LogNotifier)),
    }
}

/// Send without failing the caller.
pub async fn notify_best_effort(notifier: &dyn Notifier, message: &str) {
    if let Err(e) = notifier.notify(message).await {
        warn!(error = %e, "Notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str) -> Result<()> {
            Err(AppError::config("webhook down"))
        }
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        notify_best_effort(&FailingNotifier, "hello").await;
        notify_best_effort(&LogNotifier, "hello").await;
    }

    #[test]
    fn test_from_config_without_webhook_is_log_only() {
        assert!(from_config(&NotifyConfig::default()).is_ok());
    }
}
