//! TTL-bounded advisory lock keyed by fingerprint
//!
//! Every acquire issues a fresh opaque token; a normal release only deletes
//! the lock while it still carries that token. [`DistributedLock::force_release`]
//! is the explicit recovery path for clearing someone else's lock.

use crate::descriptor::Fingerprint;
use crate::error::Result;
use crate::store::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const LOCK_KEY_PREFIX: &str = "media_lock:";

pub(crate) fn lock_key(fingerprint: &Fingerprint) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, fingerprint)
}

/// Proof of acquisition, required to release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    fingerprint: Fingerprint,
    token: String,
}

impl LockToken {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn MetadataStore>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn MetadataStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn issue(fingerprint: &Fingerprint) -> LockToken {
        LockToken {
            fingerprint: fingerprint.clone(),
            token: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Take the lock unconditionally, resetting its TTL
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> Result<LockToken> {
        let token = Self::issue(fingerprint);
        self.store
            .set_ex(&lock_key(fingerprint), &token.token, self.ttl)
            .await?;
        debug!(fingerprint = %fingerprint, "Lock acquired");
        Ok(token)
    }

    /// Take the lock only if nobody holds it
    pub async fn try_acquire(&self, fingerprint: &Fingerprint) -> Result<Option<LockToken>> {
        let token = Self::issue(fingerprint);
        if self
            .store
            .set_nx_ex(&lock_key(fingerprint), &token.token, self.ttl)
            .await?
        {
            debug!(fingerprint = %fingerprint, "Lock acquired");
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Release a lock taken with `token`. Returns false when the lock had
    /// already expired or been taken over.
    pub async fn release(&self, token: &LockToken) -> Result<bool> {
        let released = self
            .store
            .del_if_eq(&lock_key(&token.fingerprint), &token.token)
            .await?;
        if released {
            debug!(fingerprint = %token.fingerprint, "Lock released");
        } else {
            warn!(
                fingerprint = %token.fingerprint,
                "Lock expired or was taken over before release"
            );
        }
        Ok(released)
    }

    /// Delete the lock regardless of who holds it
    pub async fn force_release(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let removed = self.store.del(&lock_key(fingerprint)).await?;
        if removed {
            warn!(fingerprint = %fingerprint, "Lock forcibly released");
        }
        Ok(removed)
    }

    pub async fn is_held(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.store.get(&lock_key(fingerprint)).await?.is_some())
    }
}
