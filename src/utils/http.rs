// src/utils/http.rs

//! HTTP client utilities.

use std::path::Path;
use std::time::Duration;

use reqwest::header::REFERER;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::utils::retry::{RetryPolicy, is_connect_error};

/// Form fields of a POST request.
pub type Form = Vec<(&'static str, String)>;

/// Session against one portal: fixed base URL, default headers, cookie
/// store and the injected retry policy.
///
/// Only sending is retried; status errors surface immediately.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &CrawlerConfig, retry: RetryPolicy) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: Url::parse(&config.base_url)?,
            retry,
        })
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// GET a page, returning its body and the final URL after redirects.
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<(String, Url)> {
        let url = self.url(path)?;
        let response = self
            .retry
            .run(path, || self.client.get(url.clone()).query(query).send(), is_connect_error)
            .await?
            .error_for_status()?;
        let final_url = response.url().clone();
        let text = expect_markup(path, response.text().await?)?;
        Ok((text, final_url))
    }

    /// GET a JSON document.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        referer: Option<&str>,
    ) -> Result<serde_json::Value> {
        let url = self.url(path)?;
        let response = self
            .retry
            .run(
                path,
                || {
                    let mut request = self.client.get(url.clone()).query(query);
                    if let Some(referer) = referer {
                        request = request.header(REFERER, referer);
                    }
                    request.send()
                },
                is_connect_error,
            )
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::parse(format!("{path} returned non-JSON body: {e}")))
    }

    /// POST a form and return the markup body.
    pub async fn post_form_text(&self, path: &str, form: &Form) -> Result<String> {
        let url = self.url(path)?;
        let response = self
            .retry
            .run(path, || self.client.post(url.clone()).form(form).send(), is_connect_error)
            .await?
            .error_for_status()?;
        expect_markup(path, response.text().await?)
    }

    /// POST a form and stream the response body into `dest`.
    pub async fn download_to(&self, path: &str, form: &Form, dest: &Path) -> Result<u64> {
        let url = self.url(path)?;
        let mut response = self
            .retry
            .run(path, || self.client.post(url.clone()).form(form).send(), is_connect_error)
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path, bytes = written, dest = %dest.display(), "Downloaded");
        Ok(written)
    }
}

/// The portal reports errors as JSON on endpoints that normally return markup.
fn expect_markup(path: &str, text: String) -> Result<String> {
    if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
        return Err(AppError::parse(format!(
            "{path} returned an error document: {}",
            text.chars().take(200).collect::<String>()
        )));
    }
    Ok(text)
}
