use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bb_core::Digest;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::blob_access::dedup_digests;
use crate::types::{chunked, collect_bytes};
use crate::{Blob, BlobAccess, BlobError, BlobResult};

/// Default size of the chunks handed out by `get`.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory backend for testing and development
///
/// Blobs are keyed by their full digest, instance name included, and are
/// never evicted.
pub struct MemoryBlobAccess {
    blobs: Arc<RwLock<HashMap<Digest, Bytes>>>,
    chunk_size: usize,
}

impl MemoryBlobAccess {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            chunk_size,
        }
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Insert content directly, bypassing size checks (test seeding)
    pub fn insert(&self, digest: Digest, data: impl Into<Bytes>) {
        self.blobs.write().insert(digest, data.into());
    }
}

impl Default for MemoryBlobAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobAccess for MemoryBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        let data = self
            .blobs
            .read()
            .get(digest)
            .cloned()
            .ok_or_else(|| BlobError::not_found(digest))?;
        Ok(Blob::new(data.len() as i64, chunked(data, self.chunk_size)))
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        let data = collect_bytes(blob.body, blob.size_bytes).await?;
        if data.len() as i64 != blob.size_bytes {
            return Err(BlobError::invalid(format!(
                "Blob is {} bytes in size, while {} bytes were expected",
                data.len(),
                blob.size_bytes
            )));
        }
        self.blobs.write().insert(digest.clone(), data);
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        let blobs = self.blobs.read();
        Ok(dedup_digests(digests)
            .into_iter()
            .filter(|digest| !blobs.contains_key(digest))
            .collect())
    }
}
