//! Metadata-indexed, content-addressed cache of transform outputs

use crate::blob::BlobStore;
use crate::descriptor::Fingerprint;
use crate::error::Result;
use crate::store::MetadataStore;
use crate::types::{CacheConfig, CachedBlob, PipelineOutput};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const CACHE_KEY_PREFIX: &str = "media_cache:v1:";

const FIELD_HASH: &str = "hash";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_CONTENT_TYPE: &str = "content_type";
const FIELD_SIZE: &str = "size";

pub(crate) fn entry_key(fingerprint: &Fingerprint) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, fingerprint)
}

/// Fields of a cache entry as recorded in the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryRecord {
    hash: String,
    created_at: DateTime<Utc>,
    content_type: String,
    size: u64,
}

impl EntryRecord {
    fn parse(fields: &HashMap<String, String>) -> Option<Self> {
        let hash = fields.get(FIELD_HASH)?.clone();
        if hash.len() < 4 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let millis = fields.get(FIELD_CREATED_AT)?.parse::<i64>().ok()?;
        let created_at = Utc.timestamp_millis_opt(millis).single()?;
        let content_type = fields
            .get(FIELD_CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = fields
            .get(FIELD_SIZE)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Some(Self {
            hash,
            created_at,
            content_type,
            size,
        })
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_HASH, self.hash.clone()),
            (FIELD_CREATED_AT, self.created_at.timestamp_millis().to_string()),
            (FIELD_CONTENT_TYPE, self.content_type.clone()),
            (FIELD_SIZE, self.size.to_string()),
        ]
    }
}

/// Registry of fingerprint → blob, backed by a metadata store and a blob directory
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    ttl: Duration,
    sliding_expiration: bool,
}

impl CacheStore {
    pub fn new(store: Arc<dyn MetadataStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            blobs: BlobStore::new(config.cache_dir.clone()),
            ttl: config.ttl,
            sliding_expiration: config.sliding_expiration,
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.blobs.init().await?;
        debug!(cache_dir = ?self.blobs.root(), "Cache store initialized");
        Ok(())
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fingerprint. Entries whose blob is gone or whose fields are
    /// unreadable are deleted and reported as a miss, as are entries created
    /// more than a TTL ago unless expiration is sliding.
    pub async fn read(&self, fingerprint: &Fingerprint) -> Result<Option<CachedBlob>> {
        let key = entry_key(fingerprint);
        let fields = self.store.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let Some(record) = EntryRecord::parse(&fields) else {
            warn!(fingerprint = %fingerprint, "Malformed cache entry, removing");
            self.store.del(&key).await?;
            return Ok(None);
        };

        let age_secs = (Utc::now() - record.created_at).num_seconds().max(0) as u64;
        // Under sliding expiration the key's own expiry, refreshed on every
        // hit, decides when the entry dies
        if !self.sliding_expiration && age_secs > self.ttl.as_secs() {
            debug!(fingerprint = %fingerprint, age_secs, "Cache entry expired");
            self.store.del(&key).await?;
            return Ok(None);
        }

        if !self.blobs.exists(&record.hash).await {
            warn!(
                fingerprint = %fingerprint,
                hash = %record.hash,
                "Cached blob missing, removing stale entry"
            );
            self.store.del(&key).await?;
            return Ok(None);
        }

        if self.sliding_expiration {
            self.store.expire(&key, self.ttl).await?;
        }

        Ok(Some(CachedBlob {
            fingerprint: fingerprint.clone(),
            path: self.blobs.path_for(&record.hash),
            content_hash: record.hash,
            content_type: record.content_type,
            size: record.size,
            created_at: record.created_at,
            age_secs,
        }))
    }

    /// Stream pipeline output into a blob, then record the entry.
    ///
    /// The blob is committed before the entry is written, so an entry never
    /// points at a blob that does not exist. If recording fails the blob is
    /// left orphaned for the sweeper and the error is returned.
    pub async fn write(
        &self,
        fingerprint: &Fingerprint,
        output: PipelineOutput,
    ) -> Result<CachedBlob> {
        let PipelineOutput { content_type, body } = output;
        let stored = self.blobs.write(body).await?;

        let record = EntryRecord {
            hash: stored.hash,
            created_at: Utc::now(),
            content_type,
            size: stored.size,
        };
        self.store
            .hset_ex(&entry_key(fingerprint), &record.fields(), self.ttl)
            .await?;

        debug!(
            fingerprint = %fingerprint,
            hash = %record.hash,
            size = record.size,
            "Cache entry written"
        );

        Ok(CachedBlob {
            fingerprint: fingerprint.clone(),
            path: stored.path,
            content_hash: record.hash,
            content_type: record.content_type,
            size: record.size,
            created_at: record.created_at,
            age_secs: 0,
        })
    }

    /// Drop the entry for a fingerprint. The blob is left for the sweeper
    /// since other fingerprints may share it.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.store.del(&entry_key(fingerprint)).await
    }

    /// Restart the TTL of an entry
    pub async fn touch(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.store.expire(&entry_key(fingerprint), self.ttl).await
    }
}
