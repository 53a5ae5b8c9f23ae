//! `google.bytestream` service over the content addressable storage.
//!
//! Resource names:
//! - read: `[{instance}/]blobs/{hash}/{size}`
//! - write: `[{instance}/]uploads/{uuid}/blobs/{hash}/{size}`
//!
//! Instance names may contain slashes; names are parsed from the end.

use std::pin::Pin;
use std::sync::Arc;

use bb_blob::{Blob, BlobAccess, BlobError, ByteStream};
use bb_core::{BbError, BbResult, Digest};
use bb_proto::bytestream::byte_stream_server::ByteStream as ByteStreamRpc;
use bb_proto::bytestream::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

/// Largest `ReadResponse` payload sent by default.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

pub type ReadResponseStream =
    Pin<Box<dyn Stream<Item = Result<ReadResponse, Status>> + Send + 'static>>;

fn invalid_resource_name(resource_name: &str) -> BbError {
    BbError::invalid_argument(format!("Invalid resource name: {:?}", resource_name))
}

fn parse_digest(
    resource_name: &str,
    instance: &[&str],
    hash: &str,
    size: &str,
) -> BbResult<Digest> {
    // A leading slash or "//" would otherwise alias another instance.
    if instance.iter().any(|segment| segment.is_empty()) {
        return Err(invalid_resource_name(resource_name));
    }
    let size_bytes = size
        .parse::<i64>()
        .map_err(|_| BbError::invalid_argument(format!("Invalid blob size: {:?}", size)))?;
    Digest::new(instance.join("/"), hash, size_bytes)
}

/// Digest named by a read resource name.
pub fn parse_read_resource_name(resource_name: &str) -> BbResult<Digest> {
    let parts: Vec<&str> = resource_name.split('/').collect();
    match parts.as_slice() {
        [instance @ .., "blobs", hash, size] => parse_digest(resource_name, instance, hash, size),
        _ => Err(invalid_resource_name(resource_name)),
    }
}

/// Digest named by a write resource name.
pub fn parse_write_resource_name(resource_name: &str) -> BbResult<Digest> {
    let parts: Vec<&str> = resource_name.split('/').collect();
    match parts.as_slice() {
        [instance @ .., "uploads", upload_id, "blobs", hash, size] if !upload_id.is_empty() => {
            parse_digest(resource_name, instance, hash, size)
        }
        _ => Err(invalid_resource_name(resource_name)),
    }
}

/// Progress of one `Write` call.
///
/// Owned by the call that created it; uploads are not resumable across calls.
#[derive(Debug, Clone)]
pub struct UploadSession {
    resource_name: String,
    digest: Digest,
    committed_size: i64,
    finished: bool,
}

impl UploadSession {
    /// Start a session from the resource name of the first request.
    pub fn start(resource_name: &str) -> BbResult<Self> {
        if resource_name.is_empty() {
            return Err(BbError::invalid_argument(
                "First write request does not contain a resource name",
            ));
        }
        Ok(Self {
            resource_name: resource_name.to_string(),
            digest: parse_write_resource_name(resource_name)?,
            committed_size: 0,
            finished: false,
        })
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn committed_size(&self) -> i64 {
        self.committed_size
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Account for the next request of the stream.
    pub fn accept(&mut self, request: &WriteRequest) -> BbResult<()> {
        if self.finished {
            return Err(BbError::invalid_argument(
                "Received data after the write was finished",
            ));
        }
        if !request.resource_name.is_empty() && request.resource_name != self.resource_name {
            return Err(BbError::invalid_argument(format!(
                "Resource name changed from {:?} to {:?} during the write",
                self.resource_name, request.resource_name
            )));
        }
        if request.write_offset != self.committed_size {
            return Err(BbError::invalid_argument(format!(
                "Write at offset {}, while {} bytes were committed",
                request.write_offset, self.committed_size
            )));
        }
        let committed_size = self.committed_size + request.data.len() as i64;
        if committed_size > self.digest.size_bytes() {
            return Err(BbError::invalid_argument(format!(
                "Write of {} bytes exceeds the blob size of {} bytes",
                committed_size,
                self.digest.size_bytes()
            )));
        }
        if request.finish_write && committed_size != self.digest.size_bytes() {
            return Err(BbError::invalid_argument(format!(
                "Write finished after {} bytes, while the blob is {} bytes in size",
                committed_size,
                self.digest.size_bytes()
            )));
        }
        self.committed_size = committed_size;
        self.finished = request.finish_write;
        Ok(())
    }
}

/// Turn the remainder of a write stream into a blob body.
///
/// Protocol violations and client errors become error items, so the backend
/// aborts the put instead of committing a partial blob.
fn upload_body<S>(mut session: UploadSession, first: WriteRequest, mut requests: S) -> ByteStream
where
    S: Stream<Item = Result<WriteRequest, Status>> + Send + Unpin + 'static,
{
    Box::pin(async_stream::stream! {
        let mut next = Some(first);
        loop {
            let request = match next.take() {
                Some(request) => request,
                None => match requests.next().await {
                    Some(Ok(request)) => request,
                    Some(Err(status)) => {
                        debug!(digest = %session.digest(), %status, "upload aborted by client");
                        yield Err(BlobError::Remote(status));
                        return;
                    }
                    None => {
                        debug!(
                            digest = %session.digest(),
                            committed_size = session.committed_size(),
                            "upload ended without finishing"
                        );
                        yield Err(BlobError::Core(BbError::invalid_argument(format!(
                            "Client closed stream after {} bytes without finishing the write",
                            session.committed_size()
                        ))));
                        return;
                    }
                },
            };
            if let Err(err) = session.accept(&request) {
                debug!(digest = %session.digest(), %err, "upload rejected");
                yield Err(BlobError::Core(err));
                return;
            }
            if !request.data.is_empty() {
                yield Ok(request.data);
            }
            if session.is_finished() {
                return;
            }
        }
    })
}

/// Store the blob carried by a stream of write requests.
pub async fn handle_write<S>(
    blob_access: &dyn BlobAccess,
    mut requests: S,
) -> Result<WriteResponse, Status>
where
    S: Stream<Item = Result<WriteRequest, Status>> + Send + Unpin + 'static,
{
    let first = requests.next().await.ok_or_else(|| {
        BbError::invalid_argument("Client closed stream without sending a write request")
    })??;
    let session = UploadSession::start(&first.resource_name)?;
    let digest = session.digest().clone();

    let body = upload_body(session, first, requests);
    blob_access
        .put(&digest, Blob::new(digest.size_bytes(), body))
        .await?;
    Ok(WriteResponse {
        committed_size: digest.size_bytes(),
    })
}

/// Stream a byte range of a blob in chunks of at most `chunk_size` bytes.
pub async fn handle_read(
    blob_access: &dyn BlobAccess,
    chunk_size: usize,
    request: ReadRequest,
) -> Result<ReadResponseStream, Status> {
    if request.read_offset < 0 {
        return Err(BbError::invalid_argument(format!(
            "Negative read offset: {}",
            request.read_offset
        ))
        .into());
    }
    if request.read_limit < 0 {
        return Err(BbError::invalid_argument(format!(
            "Negative read limit: {}",
            request.read_limit
        ))
        .into());
    }
    let digest = parse_read_resource_name(&request.resource_name)?;
    if request.read_offset > digest.size_bytes() {
        return Err(BbError::invalid_argument(format!(
            "Read offset {} is past the end of the blob of {} bytes",
            request.read_offset,
            digest.size_bytes()
        ))
        .into());
    }

    let mut body = blob_access.get(&digest).await?.body;
    let chunk_size = chunk_size.max(1);
    let mut skip = request.read_offset as usize;
    let mut remaining = match request.read_limit {
        0 => usize::MAX,
        limit => limit as usize,
    };

    Ok(Box::pin(async_stream::stream! {
        while remaining > 0 {
            let mut data = match body.next().await {
                Some(Ok(data)) => data,
                Some(Err(err)) => {
                    yield Err(Status::from(err));
                    return;
                }
                None => return,
            };
            if skip > 0 {
                let n = skip.min(data.len());
                let _ = data.split_to(n);
                skip -= n;
            }
            data.truncate(remaining);
            remaining -= data.len();
            while !data.is_empty() {
                let chunk = data.split_to(chunk_size.min(data.len()));
                yield Ok(ReadResponse { data: chunk });
            }
        }
    }))
}

/// `ByteStream` service over the content addressable storage.
pub struct ByteStreamService {
    blob_access: Arc<dyn BlobAccess>,
    read_chunk_size: usize,
}

impl ByteStreamService {
    pub fn new(blob_access: Arc<dyn BlobAccess>) -> Self {
        Self {
            blob_access,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }
}

#[tonic::async_trait]
impl ByteStreamRpc for ByteStreamService {
    type ReadStream = ReadResponseStream;

    async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<Self::ReadStream>, Status> {
        let stream =
            handle_read(self.blob_access.as_ref(), self.read_chunk_size, request.into_inner())
                .await?;
        Ok(Response::new(stream))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<WriteResponse>, Status> {
        let response = handle_write(self.blob_access.as_ref(), request.into_inner()).await?;
        Ok(Response::new(response))
    }

    async fn query_write_status(
        &self,
        request: Request<QueryWriteStatusRequest>,
    ) -> Result<Response<QueryWriteStatusResponse>, Status> {
        let digest = parse_write_resource_name(&request.into_inner().resource_name)?;
        let missing = self
            .blob_access
            .find_missing(std::slice::from_ref(&digest))
            .await?;
        let response = if missing.is_empty() {
            QueryWriteStatusResponse {
                committed_size: digest.size_bytes(),
                complete: true,
            }
        } else {
            QueryWriteStatusResponse {
                committed_size: 0,
                complete: false,
            }
        };
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_core::ErrorKind;
    use bytes::Bytes;

    const HASH: &str = "185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969";

    fn write(
        resource_name: &str,
        write_offset: i64,
        data: &'static [u8],
        finish_write: bool,
    ) -> WriteRequest {
        WriteRequest {
            resource_name: resource_name.to_string(),
            write_offset,
            finish_write,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_parse_read_resource_names() {
        let digest = parse_read_resource_name(&format!("blobs/{}/5", HASH)).unwrap();
        assert_eq!(digest.instance(), "");
        assert_eq!(digest.size_bytes(), 5);

        let digest = parse_read_resource_name(&format!("a/b/blobs/{}/5", HASH)).unwrap();
        assert_eq!(digest.instance(), "a/b");

        for name in [
            format!("blobs/{}", HASH),
            format!("blobs/{}/five", HASH),
            format!("blobs/{}/-1", HASH),
            format!("files/{}/5", HASH),
            "blobs/abc/3".to_string(),
            format!("/blobs/{}/5", HASH),
            format!("a//b/blobs/{}/5", HASH),
            format!("debian8//blobs/{}/5", HASH),
        ] {
            let err = parse_read_resource_name(&name).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{}", name);
        }
    }

    #[test]
    fn test_parse_write_resource_names() {
        let name = format!(
            "debian8/uploads/7c4bd2d4-5d4e-4f7e-8a51-c65e3c4b2f3e/blobs/{}/5",
            HASH
        );
        let digest = parse_write_resource_name(&name).unwrap();
        assert_eq!(digest.instance(), "debian8");
        assert_eq!(digest.hash(), HASH);

        assert!(parse_write_resource_name(&format!("uploads/blobs/{}/5", HASH)).is_err());
        assert!(parse_write_resource_name(&format!("debian8/blobs/{}/5", HASH)).is_err());

        for name in [
            format!("/uploads/x/blobs/{}/5", HASH),
            format!("a//b/uploads/x/blobs/{}/5", HASH),
        ] {
            let err = parse_write_resource_name(&name).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{}", name);
        }
    }

    #[test]
    fn test_session_tracks_offsets() {
        let name = format!("uploads/1/blobs/{}/5", HASH);
        let mut session = UploadSession::start(&name).unwrap();

        session.accept(&write(&name, 0, b"he", false)).unwrap();
        session.accept(&write("", 2, b"l", false)).unwrap();
        assert_eq!(session.committed_size(), 3);

        // Rewinding or skipping ahead is refused.
        assert!(session.clone().accept(&write("", 2, b"lo", true)).is_err());
        assert!(session.clone().accept(&write("", 4, b"o", true)).is_err());

        session.accept(&write("", 3, b"lo", true)).unwrap();
        assert!(session.is_finished());
        assert!(session.accept(&write("", 5, b"", true)).is_err());
    }

    #[test]
    fn test_session_rejects_overruns_and_early_finish() {
        let name = format!("uploads/1/blobs/{}/5", HASH);
        let mut session = UploadSession::start(&name).unwrap();
        assert!(session.clone().accept(&write("", 0, b"hello!", false)).is_err());
        assert!(session.clone().accept(&write("", 0, b"hell", true)).is_err());

        let other = format!("uploads/2/blobs/{}/5", HASH);
        assert!(session.accept(&write(&other, 0, b"h", false)).is_err());
    }

    #[test]
    fn test_session_requires_resource_name() {
        let err = UploadSession::start("").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
