//! Time-based eviction of blob files
//!
//! Files whose last access is older than the TTL are deleted, then empty shard
//! directories are pruned bottom-up. Metadata entries are left alone: a stale
//! entry pointing at a swept blob is healed on its next read.

use crate::error::Result;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_removed: u64,
    pub bytes_freed: u64,
    pub dirs_removed: u64,
}

/// Sweep `root` once. A missing root is an empty cache, not an error.
pub async fn sweep(root: &Path, ttl: Duration) -> Result<SweepReport> {
    let root = root.to_path_buf();
    let report = tokio::task::spawn_blocking(move || sweep_blocking(&root, ttl)).await??;
    Ok(report)
}

fn last_used(metadata: &std::fs::Metadata) -> io::Result<SystemTime> {
    metadata.accessed().or_else(|_| metadata.modified())
}

fn sweep_blocking(root: &Path, ttl: Duration) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    if !root.exists() {
        return Ok(report);
    }
    let now = SystemTime::now();

    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "Skipping path during sweep");
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            // Fails harmlessly on directories that still hold files
            if std::fs::remove_dir(path).is_ok() {
                report.dirs_removed += 1;
            }
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(%err, path = %path.display(), "Could not stat cached file");
                continue;
            }
        };
        let age = last_used(&metadata)
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or(Duration::ZERO);
        if age < ttl {
            continue;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Evicted blob");
                report.files_removed += 1;
                report.bytes_freed += metadata.len();
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(%err, path = %path.display(), "Failed to evict blob"),
        }
    }

    Ok(report)
}

/// Run [`sweep`] on a fixed interval until the runtime shuts down
pub fn spawn_sweeper(root: PathBuf, ttl: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep(&root, ttl).await {
                Ok(report) => info!(
                    files_removed = report.files_removed,
                    bytes_freed = report.bytes_freed,
                    dirs_removed = report.dirs_removed,
                    "Cache sweep complete"
                ),
                Err(e) => error!(error = %e, "Cache sweep failed"),
            }
        }
    })
}
