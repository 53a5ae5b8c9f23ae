use std::sync::Arc;

use async_trait::async_trait;
use bb_core::{Digest, DigestHasher};
use futures::StreamExt;
use tracing::error;

use crate::{Blob, BlobAccess, BlobError, BlobResult, ByteStream};

/// Enforces the content addressing invariant on top of another backend.
///
/// Reads are hashed while streaming; content that does not match its digest
/// is reported as corruption. Writes are hashed as well, and a mismatching
/// body fails before its end is reached, so the wrapped backend never commits
/// it.
pub struct ValidatingBlobAccess {
    inner: Arc<dyn BlobAccess>,
}

impl ValidatingBlobAccess {
    pub fn new(inner: Arc<dyn BlobAccess>) -> Self {
        Self { inner }
    }
}

/// Hash `body` while passing it through, mapping mismatches through `on_mismatch`.
fn validate_stream(
    digest: Digest,
    mut body: ByteStream,
    on_mismatch: fn(&Digest, String) -> BlobError,
) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut hasher = DigestHasher::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            hasher.update(&chunk);
            if hasher.size_bytes() > digest.size_bytes() {
                yield Err(on_mismatch(&digest, format!(
                    "Blob is longer than its declared size of {} bytes",
                    digest.size_bytes()
                )));
                return;
            }
            yield Ok(chunk);
        }
        if let Err(e) = hasher.verify(&digest) {
            yield Err(on_mismatch(&digest, e.message));
        }
    })
}

fn corrupted(digest: &Digest, message: String) -> BlobError {
    error!(%digest, "Stored blob is corrupted: {}", message);
    BlobError::corrupted(format!("{}: {}", digest, message))
}

fn rejected(_digest: &Digest, message: String) -> BlobError {
    BlobError::invalid(message)
}

#[async_trait]
impl BlobAccess for ValidatingBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        let blob = self.inner.get(digest).await?;
        if blob.size_bytes != digest.size_bytes() {
            return Err(corrupted(
                digest,
                format!(
                    "Backend reported a size of {} bytes, while {} bytes were expected",
                    blob.size_bytes,
                    digest.size_bytes()
                ),
            ));
        }
        let body = validate_stream(digest.clone(), blob.body, corrupted);
        Ok(Blob::new(blob.size_bytes, body))
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        if blob.size_bytes != digest.size_bytes() {
            return Err(BlobError::invalid(format!(
                "Blob is {} bytes in size, while its digest declares {} bytes",
                blob.size_bytes,
                digest.size_bytes()
            )));
        }
        let body = validate_stream(digest.clone(), blob.body, rejected);
        self.inner.put(digest, Blob::new(blob.size_bytes, body)).await
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        self.inner.find_missing(digests).await
    }
}
