//! Blob store abstraction for crawl artifacts and crawl logs.
//!
//! Keys are `/`-separated and listed with S3 delimiter semantics, so a
//! prefix behaves like a directory:
//!
//! ```text
//! {env}/
//! └── 2023/
//!     └── 07/
//!         └── 01/
//!             └── 1688169600.123456/
//!                 ├── 토지이용계획정보/
//!                 │   ├── crawler-log/1688169600.123456.json
//!                 │   └── data/전체데이터/서울특별시/종로구/base_date_2023-06-30/*.zip
//!                 └── 토지특성정보/
//! ```

pub mod database;
pub mod local;
pub mod paths;
pub mod s3;

use std::collections::BTreeSet;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{StorageBackend, StorageConfig};

// Re-export for convenience
pub use database::{PgRowStore, RowStore};
pub use local::LocalBlobStore;
pub use paths::RunId;
pub use s3::S3BlobStore;

/// One level of a delimited listing. Both sets hold full keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobListing {
    /// Directory-like entries, each ending with the delimiter
    pub common_prefixes: BTreeSet<String>,
    /// Objects directly under the prefix
    pub contents: Vec<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub location: String,
    pub size: usize,
    /// Hex SHA-256 of the uploaded bytes
    pub sha256: String,
}

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List entries directly under `prefix`, grouping deeper keys by `delimiter`.
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<BlobListing>;

    /// Fetch an object. A missing key is `AppError::NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store an object, replacing any previous content.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<UploadReceipt>;

    /// Human readable location of a key, for logs.
    fn location(&self, key: &str) -> String;
}

/// Hex SHA-256 digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Last path segment of a listed prefix or key, without the delimiter.
pub fn entry_name<'a>(parent: &str, entry: &'a str) -> &'a str {
    entry
        .strip_prefix(parent)
        .unwrap_or(entry)
        .trim_end_matches('/')
}

/// Open the configured backend.
pub async fn open(config: &StorageConfig) -> Result<Box<dyn BlobStore>> {
    match config.backend {
        StorageBackend::S3 => Ok(Box::new(S3BlobStore::from_config(config).await?)),
        StorageBackend::Local => Ok(Box::new(LocalBlobStore::new(&config.local_root))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("local/", "local/2023/"), "2023");
        assert_eq!(entry_name("a/b/", "a/b/file.zip"), "file.zip");
    }
}
