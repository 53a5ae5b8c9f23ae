use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::{BlobError, BlobResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = BlobResult<Bytes>> + Send>>;

/// Blob content in transit: its length plus a lazily produced body.
///
/// For the content addressable storage `size_bytes` equals the digest's size.
/// For the action cache the key is the action's digest and `size_bytes` is
/// the length of the stored result.
pub struct Blob {
    pub size_bytes: i64,
    pub body: ByteStream,
}

impl Blob {
    pub fn new(size_bytes: i64, body: ByteStream) -> Self {
        Self { size_bytes, body }
    }

    /// Blob backed by a buffer that is already resident.
    pub fn from_bytes<B: Into<Bytes>>(data: B) -> Self {
        let data = data.into();
        let size_bytes = data.len() as i64;
        let body: ByteStream = if data.is_empty() {
            Box::pin(futures::stream::empty())
        } else {
            Box::pin(futures::stream::once(async move { Ok(data) }))
        };
        Self { size_bytes, body }
    }

    /// Buffer the whole body, refusing anything larger than `max_size_bytes`.
    pub async fn into_bytes(self, max_size_bytes: i64) -> BlobResult<Bytes> {
        if self.size_bytes > max_size_bytes {
            return Err(BlobError::invalid(format!(
                "Blob is {} bytes in size, while the maximum is {} bytes",
                self.size_bytes, max_size_bytes
            )));
        }
        collect_bytes(self.body, max_size_bytes).await
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Concatenate a body into one buffer, failing as soon as it grows past `limit`.
pub async fn collect_bytes(mut body: ByteStream, limit: i64) -> BlobResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if (buffer.len() + chunk.len()) as i64 > limit {
            return Err(BlobError::invalid(format!(
                "Blob exceeds the expected size of {} bytes",
                limit
            )));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Split a resident buffer into chunks of at most `chunk_size` bytes without copying.
pub fn chunked(data: Bytes, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<BlobResult<Bytes>> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunked_splits_without_losing_bytes() {
        let data = Bytes::from_static(b"abcdefghij");
        let chunks: Vec<Bytes> = chunked(data, 4)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[tokio::test]
    async fn test_chunked_empty_yields_nothing() {
        let chunks: Vec<_> = chunked(Bytes::new(), 4).collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_into_bytes_enforces_limit() {
        let blob = Blob::from_bytes(&b"0123456789"[..]);
        assert!(matches!(blob.into_bytes(5).await, Err(BlobError::Invalid { .. })));

        let blob = Blob::from_bytes(&b"0123456789"[..]);
        assert_eq!(blob.into_bytes(10).await.unwrap(), Bytes::from_static(b"0123456789"));
    }
}
