use std::sync::Arc;

use async_trait::async_trait;
use bb_core::Digest;
use futures::try_join;

use crate::{Blob, BlobAccess, BlobResult};

/// Routes blobs to one of two backends based on their size.
///
/// Blobs of at most `cutoff_size_bytes` go to `small`, everything else to
/// `large`. This allows keeping small objects in a low latency store while
/// large objects go to bulk storage.
pub struct SizeDistinguishingBlobAccess {
    small: Arc<dyn BlobAccess>,
    large: Arc<dyn BlobAccess>,
    cutoff_size_bytes: i64,
}

impl SizeDistinguishingBlobAccess {
    pub fn new(
        small: Arc<dyn BlobAccess>,
        large: Arc<dyn BlobAccess>,
        cutoff_size_bytes: i64,
    ) -> Self {
        Self {
            small,
            large,
            cutoff_size_bytes,
        }
    }

    fn backend_for(&self, digest: &Digest) -> &Arc<dyn BlobAccess> {
        if digest.size_bytes() <= self.cutoff_size_bytes {
            &self.small
        } else {
            &self.large
        }
    }
}

#[async_trait]
impl BlobAccess for SizeDistinguishingBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        self.backend_for(digest).get(digest).await
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        self.backend_for(digest).put(digest, blob).await
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        let (small, large): (Vec<Digest>, Vec<Digest>) = digests
            .iter()
            .cloned()
            .partition(|digest| digest.size_bytes() <= self.cutoff_size_bytes);

        let (mut missing_small, missing_large) = try_join!(
            self.small.find_missing(&small),
            self.large.find_missing(&large),
        )?;
        missing_small.extend(missing_large);
        Ok(missing_small)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobAccess;

    #[tokio::test]
    async fn test_routes_by_size() {
        let small = Arc::new(MemoryBlobAccess::new());
        let large = Arc::new(MemoryBlobAccess::new());
        let store = SizeDistinguishingBlobAccess::new(small.clone(), large.clone(), 4);

        let tiny = Digest::of_bytes("main", b"abcd");
        let big = Digest::of_bytes("main", b"abcde");
        store.put(&tiny, Blob::from_bytes(&b"abcd"[..])).await.unwrap();
        store.put(&big, Blob::from_bytes(&b"abcde"[..])).await.unwrap();

        assert_eq!(small.len(), 1);
        assert_eq!(large.len(), 1);
        assert_eq!(store.get(&big).await.unwrap().size_bytes, 5);
    }

    #[tokio::test]
    async fn test_find_missing_merges_both_sides() {
        let small = Arc::new(MemoryBlobAccess::new());
        let large = Arc::new(MemoryBlobAccess::new());
        let store = SizeDistinguishingBlobAccess::new(small.clone(), large, 4);

        let tiny = Digest::of_bytes("main", b"ab");
        let big = Digest::of_bytes("main", b"abcdefgh");
        small.insert(tiny.clone(), &b"ab"[..]);

        let missing = store.find_missing(&[tiny, big.clone()]).await.unwrap();
        assert_eq!(missing, vec![big]);
    }
}
