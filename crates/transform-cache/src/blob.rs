//! Content-addressed blob files
//!
//! Blobs live at `<root>/<hash[0:2]>/<hash[2:4]>/<hash>`. Writes stream into a
//! temporary file in the root and are renamed into place once the hash is
//! known, so readers never observe a partially written blob.

use crate::types::ByteStream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const TEMP_PREFIX: &str = ".tmp-";

/// A blob that has been committed to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub hash: String,
    pub size: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Sharded location of a blob with the given content hash
    pub fn path_for(&self, hash: &str) -> PathBuf {
        let first = hash.get(0..2).unwrap_or("00");
        let second = hash.get(2..4).unwrap_or("00");
        self.root.join(first).join(second).join(hash)
    }

    pub async fn exists(&self, hash: &str) -> bool {
        fs::metadata(self.path_for(hash))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Consume a byte stream into a content-addressed blob
    pub async fn write(&self, mut body: ByteStream) -> io::Result<StoredBlob> {
        fs::create_dir_all(&self.root).await?;
        let temp = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple()));

        let mut file = fs::File::create(&temp).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        let copied: io::Result<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = copied {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        let hash = hex::encode(hasher.finalize());
        let path = self.path_for(&hash);
        if let Err(e) = self.commit(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        debug!(hash = %hash, size, "Stored blob");
        Ok(StoredBlob { hash, size, path })
    }

    async fn commit(&self, temp: &Path, path: &Path) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob path has no parent"))?;
        fs::create_dir_all(parent).await?;
        match fs::rename(temp, path).await {
            // The sweeper may have pruned the freshly created shard directory
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(parent).await?;
                fs::rename(temp, path).await
            }
            other => other,
        }
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn remove(&self, hash: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_for(hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
