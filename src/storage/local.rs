//! Local filesystem blob store.
//!
//! Mirrors the S3 key layout under a root directory for development and
//! tests. Production deployments should use `S3BlobStore`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::storage::{BlobListing, BlobStore, UploadReceipt, sha256_hex};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root_dir: PathBuf,
}

impl LocalBlobStore {
    /// Create a new store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key.trim_start_matches('/'))
    }

    /// Every object key below `dir`, relative to the root.
    async fn walk(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // in-flight temp files
                if name.starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root_dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }

    /// Directory to start walking from: the deepest complete directory in `prefix`.
    fn walk_root(&self, prefix: &str) -> PathBuf {
        match prefix.rfind('/') {
            Some(idx) => self.path(&prefix[..idx]),
            None => self.root_dir.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<BlobListing> {
        let mut keys = Vec::new();
        self.walk(&self.walk_root(prefix), &mut keys).await?;

        let mut common_prefixes = BTreeSet::new();
        let mut contents = Vec::new();
        for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            match rest.find(delimiter).filter(|_| !delimiter.is_empty()) {
                Some(idx) => {
                    common_prefixes.insert(format!("{prefix}{}", &rest[..idx + delimiter.len()]));
                }
                None => contents.push(key),
            }
        }
        contents.sort();

        debug!(
            prefix,
            prefixes = common_prefixes.len(),
            objects = contents.len(),
            "Listed local store"
        );
        Ok(BlobListing {
            common_prefixes,
            contents,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found(self.location(key)))
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<UploadReceipt> {
        let path = self.path(key);
        let parent = path
            .parent()
            .ok_or_else(|| AppError::validation(format!("invalid blob key '{key}'")))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::validation(format!("invalid blob key '{key}'")))?;
        let tmp = parent.join(format!(".{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(UploadReceipt {
            location: self.location(key),
            size: bytes.len(),
            sha256: sha256_hex(&bytes),
        })
    }

    fn location(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded(keys: &[&str]) -> (TempDir, LocalBlobStore) {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        for key in keys {
            store
                .put(key, b"x".to_vec(), "application/octet-stream")
                .await
                .unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_tmp, store) = seeded(&[]).await;
        let receipt = store.put("a/b/test.txt", b"hello".to_vec(), "text/plain").await.unwrap();
        assert_eq!(receipt.size, 5);
        assert_eq!(store.get("a/b/test.txt").await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let (_tmp, store) = seeded(&[]).await;
        let err = store.get("nope.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_groups_by_delimiter() {
        let (_tmp, store) = seeded(&[
            "local/2023/07/01/run/a.json",
            "local/2024/01/01/run/b.json",
            "local/top.json",
            "other/2025/x.json",
        ])
        .await;

        let listing = store.list("local/", "/").await.unwrap();
        let prefixes: Vec<_> = listing.common_prefixes.iter().cloned().collect();
        assert_eq!(prefixes, vec!["local/2023/", "local/2024/"]);
        assert_eq!(listing.contents, vec!["local/top.json"]);
    }

    #[tokio::test]
    async fn test_list_partial_prefix_and_missing() {
        let (_tmp, store) = seeded(&["local/2023/a.json", "local/2024/b.json"]).await;

        let listing = store.list("local/202", "/").await.unwrap();
        assert_eq!(listing.common_prefixes.len(), 2);

        let empty = store.list("missing/", "/").await.unwrap();
        assert_eq!(empty, BlobListing::default());
    }

    #[tokio::test]
    async fn test_temp_files_are_hidden() {
        let (tmp, store) = seeded(&["run/a.zip"]).await;
        std::fs::write(tmp.path().join("run/.b.zip.tmp"), b"partial").unwrap();

        let listing = store.list("run/", "/").await.unwrap();
        assert_eq!(listing.contents, vec!["run/a.zip"]);
    }
}
