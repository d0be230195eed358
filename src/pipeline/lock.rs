// src/pipeline/lock.rs

//! Single-flight guard for crawl and load runs.
//!
//! A lease file is created with create-new semantics and holds the holder
//! id and expiry. An expired lease may be taken over. Only processes that
//! share the lease path's filesystem are excluded.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Lease file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub operation: String,
}

impl LeaseInfo {
    fn new(operation: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(6));
        Self {
            holder_id: holder_id(now),
            acquired_at: now,
            expires_at: now + ttl,
            operation: operation.to_string(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn holder_id(now: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        std::process::id(),
        now.timestamp_nanos_opt().unwrap_or_default()
    )
}

/// A held lease; dropping it releases the lease file.
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    info: LeaseInfo,
}

impl RunLease {
    /// Acquire the lease at `path` for `operation`.
    ///
    /// Fails with `AppError::Locked` while another unexpired lease exists.
    pub fn acquire(path: &Path, operation: &str, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let info = LeaseInfo::new(operation, ttl);
        let body = serde_json::to_vec_pretty(&info)?;

        // One takeover attempt: a second collision means someone else won it.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(&body)?;
                    file.sync_all()?;
                    info!(
                        path = %path.display(),
                        operation,
                        holder = %info.holder_id,
                        expires_at = %info.expires_at,
                        "Acquired run lease"
                    );
                    return Ok(Self {
                        path: path.to_path_buf(),
                        info,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_lease(path) {
                        Some(current) if !current.is_expired() => {
                            return Err(AppError::Locked(format!(
                                "'{}' is running as {} until {}",
                                current.operation, current.holder_id, current.expires_at
                            )));
                        }
                        Some(current) => warn!(
                            holder = %current.holder_id,
                            operation = %current.operation,
                            expired_at = %current.expires_at,
                            "Taking over expired run lease"
                        ),
                        None => warn!(path = %path.display(), "Replacing unreadable run lease"),
                    }
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Locked(format!(
            "lease at {} was taken concurrently",
            path.display()
        )))
    }

    pub fn info(&self) -> &LeaseInfo {
        &self.info
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        // Leave the file alone if the lease expired and was taken over.
        let ours = read_lease(&self.path).is_some_and(|l| l.holder_id == self.info.holder_id);
        if !ours {
            warn!(path = %self.path.display(), "Run lease no longer ours; not releasing");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released run lease"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to release run lease"),
        }
    }
}

fn read_lease(path: &Path) -> Option<LeaseInfo> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}
