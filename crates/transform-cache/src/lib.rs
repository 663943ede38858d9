//! Single-flight cache for transformed media
//!
//! Requests are keyed by a deterministic fingerprint of their parameters.
//! Output bytes are stored as content-addressed blobs on disk, with a small
//! metadata entry per fingerprint in a shared store. A per-fingerprint lock in
//! the same store makes sure only one worker across the fleet runs the
//! pipeline for a given request at a time.

mod blob;
mod cache;
mod coordinator;
mod descriptor;
mod error;
mod lock;
mod store;
mod sweeper;
mod types;

#[cfg(feature = "redis")]
mod redis_store;

pub use blob::{BlobStore, StoredBlob};
pub use cache::{CacheStore, CACHE_KEY_PREFIX};
pub use coordinator::{CacheCoordinator, Pipeline};
pub use descriptor::{
    AnimationFormat, AnimationRequest, Fingerprint, ImageFormat, ImageRequest, ProbeRequest,
    RequestDescriptor, DEFAULT_QUALITY,
};
pub use error::{CacheError, PipelineError, Result};
pub use lock::{DistributedLock, LockToken, LOCK_KEY_PREFIX};
pub use store::{MemoryStore, MetadataStore};
pub use sweeper::{spawn_sweeper, sweep, SweepReport};
pub use types::{
    ByteStream, CacheConfig, CacheOutcome, CacheStats, CacheStatus, CachedBlob,
    CoordinatorConfig, PipelineOutput,
};

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
