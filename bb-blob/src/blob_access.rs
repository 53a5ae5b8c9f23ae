use async_trait::async_trait;
use bb_core::Digest;

use crate::{Blob, BlobResult};

/// Core blob storage operations - must be implemented by all storage backends
///
/// Implementations are shared between concurrently running calls and are
/// responsible for their own internal synchronization.
#[async_trait]
pub trait BlobAccess: Send + Sync {
    /// Open a blob for reading. Fails with a not found error if the digest is unknown.
    ///
    /// The body is streamed; backends that do not buffer must not do so here either.
    async fn get(&self, digest: &Digest) -> BlobResult<Blob>;

    /// Store a blob under a digest.
    ///
    /// An error item in the body, or a body whose length differs from
    /// `blob.size_bytes`, aborts the write without committing anything.
    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()>;

    /// Return the subset of `digests` that is not present, without side effects.
    ///
    /// Calling this with an empty slice yields an empty result.
    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>>;
}

/// Deduplicate digests, keeping first-seen order.
pub(crate) fn dedup_digests(digests: &[Digest]) -> Vec<Digest> {
    let mut seen = std::collections::HashSet::with_capacity(digests.len());
    digests
        .iter()
        .filter(|digest| seen.insert(*digest))
        .cloned()
        .collect()
}
