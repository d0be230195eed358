//! AWS S3 blob store implementation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::StorageConfig;
use crate::storage::{BlobListing, BlobStore, UploadReceipt, sha256_hex};

/// S3-backed blob store.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 store instance.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create an S3 store from the ambient AWS configuration.
    ///
    /// A custom endpoint switches to path-style addressing for
    /// S3-compatible stores.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(region) = &config.region {
            builder = builder.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "S3 client initialized");
        Ok(Self::new(client, &config.bucket))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<BlobListing> {
        let mut listing = BlobListing {
            common_prefixes: BTreeSet::new(),
            contents: Vec::new(),
        };
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter(delimiter)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| AppError::s3(e.into_service_error()))?;

            listing.common_prefixes.extend(
                output
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string)),
            );
            listing.contents.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(
            bucket = %self.bucket,
            prefix,
            prefixes = listing.common_prefixes.len(),
            objects = listing.contents.len(),
            "Listed S3 prefix"
        );
        Ok(listing)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::s3(format!("reading {}: {e}", self.location(key))))?;
                Ok(bytes.into_bytes().to_vec())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Err(AppError::not_found(self.location(key)))
                } else {
                    Err(AppError::s3(service_err))
                }
            }
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<UploadReceipt> {
        let size = bytes.len();
        let sha256 = sha256_hex(&bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::s3(e.into_service_error()))?;

        debug!(size, "Wrote {}", self.location(key));
        Ok(UploadReceipt {
            location: self.location(key),
            size,
            sha256,
        })
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
