//! Single-flight get-or-populate
//!
//! Per fingerprint, at most one worker runs the pipeline at a time. The
//! distributed lock is the only synchronization: workers that lose the race
//! poll until the lock is gone and then re-read the cache. Stale hits are
//! served immediately while one background worker refreshes them.

use crate::cache::CacheStore;
use crate::descriptor::{Fingerprint, RequestDescriptor};
use crate::error::{CacheError, PipelineError, Result};
use crate::lock::{DistributedLock, LockToken};
use crate::store::MetadataStore;
use crate::types::{
    CacheConfig, CacheOutcome, CacheStats, CacheStatus, CachedBlob, CoordinatorConfig,
    PipelineOutput,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// External fetch+transform work for one descriptor
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn produce(
        &self,
        descriptor: &RequestDescriptor,
    ) -> std::result::Result<PipelineOutput, PipelineError>;
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    populates: AtomicU64,
    populate_failures: AtomicU64,
}

struct Inner {
    cache: CacheStore,
    lock: DistributedLock,
    pipeline: Arc<dyn Pipeline>,
    config: CoordinatorConfig,
    counters: Counters,
}

#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

impl CacheCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache_config: &CacheConfig,
        config: CoordinatorConfig,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        let cache = CacheStore::new(store.clone(), cache_config);
        let lock = DistributedLock::new(store, config.lock_ttl);
        Self {
            inner: Arc::new(Inner {
                cache,
                lock,
                pipeline,
                config,
                counters: Counters::default(),
            }),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.inner.cache.init().await
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.inner.lock
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            revalidations: c.revalidations.load(Ordering::Relaxed),
            populates: c.populates.load(Ordering::Relaxed),
            populate_failures: c.populate_failures.load(Ordering::Relaxed),
        }
    }

    /// Serve a descriptor from cache, populating it if nobody else is
    pub async fn get_or_populate(&self, descriptor: &RequestDescriptor) -> Result<CacheOutcome> {
        let fingerprint = descriptor.fingerprint();
        let started = Instant::now();
        let mut waited = false;

        loop {
            if let Some(blob) = self.inner.cache.read(&fingerprint).await? {
                return Ok(self.serve_cached(descriptor, blob, waited).await);
            }

            if let Some(token) = self.inner.lock.try_acquire(&fingerprint).await? {
                let blob = self.populate(descriptor, &fingerprint, token).await?;
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(CacheOutcome {
                    status: CacheStatus::Miss,
                    blob,
                });
            }

            debug!(fingerprint = %fingerprint, "Populate in flight, waiting");
            waited = true;
            self.wait_for_release(&fingerprint, started).await?;
        }
    }

    async fn serve_cached(
        &self,
        descriptor: &RequestDescriptor,
        blob: CachedBlob,
        waited: bool,
    ) -> CacheOutcome {
        let counters = &self.inner.counters;

        // Written by the worker we waited on
        if waited {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            return CacheOutcome {
                status: CacheStatus::Miss,
                blob,
            };
        }

        if blob.age_secs >= self.inner.config.revalidate_after.as_secs() {
            counters.revalidations.fetch_add(1, Ordering::Relaxed);
            self.revalidate_in_background(descriptor, &blob.fingerprint)
                .await;
            return CacheOutcome {
                status: CacheStatus::Revalidated,
                blob,
            };
        }

        counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %blob.fingerprint, age_secs = blob.age_secs, "Cache hit");
        CacheOutcome {
            status: CacheStatus::Hit,
            blob,
        }
    }

    async fn revalidate_in_background(
        &self,
        descriptor: &RequestDescriptor,
        fingerprint: &Fingerprint,
    ) {
        let token = match self.inner.lock.try_acquire(fingerprint).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(fingerprint = %fingerprint, "Revalidation already in flight");
                return;
            }
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Could not start revalidation");
                return;
            }
        };

        info!(fingerprint = %fingerprint, url = %descriptor.url(), "Revalidating");
        let this = self.clone();
        let descriptor = descriptor.clone();
        let fingerprint = fingerprint.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_populate(&descriptor, &fingerprint, token).await {
                error!(fingerprint = %fingerprint, error = %e, "Background revalidation failed");
            }
        });
    }

    /// Run the populate on its own task so a dropped caller does not cancel it
    async fn populate(
        &self,
        descriptor: &RequestDescriptor,
        fingerprint: &Fingerprint,
        token: LockToken,
    ) -> Result<CachedBlob> {
        let this = self.clone();
        let descriptor = descriptor.clone();
        let fingerprint = fingerprint.clone();
        tokio::spawn(async move { this.run_populate(&descriptor, &fingerprint, token).await })
            .await?
    }

    /// Populate under `token`, releasing it on every exit path
    async fn run_populate(
        &self,
        descriptor: &RequestDescriptor,
        fingerprint: &Fingerprint,
        token: LockToken,
    ) -> Result<CachedBlob> {
        let result = match self.inner.cache.read(fingerprint).await {
            // Another worker finished between our read and taking the lock
            Ok(Some(blob)) if blob.age_secs < self.inner.config.revalidate_after.as_secs() => {
                Ok(blob)
            }
            Ok(_) => self.produce_and_store(descriptor, fingerprint).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.inner.lock.release(&token).await {
            warn!(fingerprint = %fingerprint, error = %e, "Failed to release lock");
        }
        result
    }

    async fn produce_and_store(
        &self,
        descriptor: &RequestDescriptor,
        fingerprint: &Fingerprint,
    ) -> Result<CachedBlob> {
        let counters = &self.inner.counters;
        let started = Instant::now();
        counters.populates.fetch_add(1, Ordering::Relaxed);

        let result = match self.inner.pipeline.produce(descriptor).await {
            Ok(output) => self.inner.cache.write(fingerprint, output).await,
            Err(e) => Err(CacheError::Pipeline(e)),
        };

        match &result {
            Ok(blob) => info!(
                fingerprint = %fingerprint,
                kind = descriptor.kind(),
                url = %descriptor.url(),
                size = blob.size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Populated cache entry"
            ),
            Err(e) => {
                counters.populate_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    fingerprint = %fingerprint,
                    url = %descriptor.url(),
                    error = %e,
                    "Populate failed"
                );
            }
        }
        result
    }

    async fn wait_for_release(&self, fingerprint: &Fingerprint, started: Instant) -> Result<()> {
        let config = &self.inner.config;
        let mut delay = config.poll_interval;
        loop {
            if started.elapsed() >= config.max_wait {
                return Err(CacheError::LockTimeout {
                    fingerprint: fingerprint.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(config.max_poll_interval);

            if !self.inner.lock.is_held(fingerprint).await? {
                return Ok(());
            }
        }
    }
}
