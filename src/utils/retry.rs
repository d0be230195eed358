//! Bounded exponential backoff for connection-level failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::RetryConfig;

/// Retry policy injected into the HTTP client.
///
/// The wait before attempt `n + 1` is `unit * max(1, base^n mod modulus)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: u64,
    pub modulus: u64,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.base,
            modulus: config.modulus.max(1),
            unit: Duration::from_millis(config.unit_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut factor = 1u64;
        for _ in 0..attempt {
            factor = (factor * self.base) % self.modulus;
        }
        self.unit * factor.max(1) as u32
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or
    /// runs out of attempts.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F, retryable: fn(&E) -> bool) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<AppError> + Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e.into()),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(AppError::Network {
                        attempts: attempt,
                        message: format!("{label}: {e}"),
                    });
                }
                Err(e) => {
                    let delay = self.delay(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after connection failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Only failures to establish a connection are retried.
pub fn is_connect_error(e: &reqwest::Error) -> bool {
    e.is_connect()
}
