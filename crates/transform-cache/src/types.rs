//! Cache types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::Fingerprint;

/// Finite, non-restartable sequence of output chunks
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// What a pipeline hands back to the cache
pub struct PipelineOutput {
    pub content_type: String,
    pub body: ByteStream,
}

impl fmt::Debug for PipelineOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOutput")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// How a response was served, reported to clients as a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Revalidated,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Revalidated => "REVALIDATED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache entry resolved to its blob on disk
#[derive(Debug, Clone)]
pub struct CachedBlob {
    pub fingerprint: Fingerprint,
    pub content_hash: String,
    pub content_type: String,
    pub size: u64,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub status: CacheStatus,
    pub blob: CachedBlob,
}

/// Counters exposed on the health endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub populates: u64,
    pub populate_failures: u64,
}

/// Cache store settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// Hard lifetime of an entry, measured from `created_at`
    pub ttl: Duration,
    /// Refresh the entry TTL on every hit
    pub sliding_expiration: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            ttl: Duration::from_secs(24 * 60 * 60),
            sliding_expiration: false,
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Age after which a hit is served stale and refreshed in the background
    pub revalidate_after: Duration,
    /// Lifetime of a populate lock; bounds recovery from a crashed populator
    pub lock_ttl: Duration,
    /// First delay between lock polls
    pub poll_interval: Duration,
    /// Cap for the doubling poll delay
    pub max_poll_interval: Duration,
    /// Give up waiting on another populator after this long
    pub max_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            revalidate_after: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            max_poll_interval: Duration::from_millis(250),
            max_wait: Duration::from_secs(90),
        }
    }
}
