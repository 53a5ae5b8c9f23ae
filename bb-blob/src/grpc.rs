//! Backends that keep blobs on another bb-storage (or any REv2 cache) over gRPC.
//!
//! The content addressable storage flavor moves blob bodies through
//! `google.bytestream`, so large blobs are never buffered in full. The action
//! cache flavor speaks the `ActionCache` service and converts between
//! `ActionResult` messages and their encoded form.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bb_core::Digest;
use bb_proto::bytestream::byte_stream_client::ByteStreamClient;
use bb_proto::bytestream::{ReadRequest, WriteRequest};
use bb_proto::remote_execution::action_cache_client::ActionCacheClient;
use bb_proto::remote_execution::content_addressable_storage_client::ContentAddressableStorageClient;
use bb_proto::remote_execution::{
    ActionResult, FindMissingBlobsRequest, GetActionResultRequest, UpdateActionResultRequest,
};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use prost::Message;
use tonic::transport::Channel;
use tracing::debug;
use uuid::Uuid;

use crate::{Blob, BlobAccess, BlobError, BlobResult, ByteStream};

/// `[{instance}/]blobs/{hash}/{size}`
pub fn read_resource_name(digest: &Digest) -> String {
    with_instance_prefix(
        digest.instance(),
        format!("blobs/{}/{}", digest.hash(), digest.size_bytes()),
    )
}

/// `[{instance}/]uploads/{uuid}/blobs/{hash}/{size}`
pub fn write_resource_name(digest: &Digest, upload_id: &Uuid) -> String {
    with_instance_prefix(
        digest.instance(),
        format!(
            "uploads/{}/blobs/{}/{}",
            upload_id,
            digest.hash(),
            digest.size_bytes()
        ),
    )
}

fn with_instance_prefix(instance: &str, path: String) -> String {
    if instance.is_empty() {
        path
    } else {
        format!("{}/{}", instance, path)
    }
}

fn not_found_or_remote(digest: &Digest, status: tonic::Status) -> BlobError {
    if status.code() == tonic::Code::NotFound {
        BlobError::not_found(digest)
    } else {
        BlobError::Remote(status)
    }
}

/// Content addressable storage on a remote server.
#[derive(Clone)]
pub struct GrpcCasBlobAccess {
    byte_stream: ByteStreamClient<Channel>,
    cas: ContentAddressableStorageClient<Channel>,
}

impl GrpcCasBlobAccess {
    pub fn new(channel: Channel) -> Self {
        Self {
            byte_stream: ByteStreamClient::new(channel.clone()),
            cas: ContentAddressableStorageClient::new(channel),
        }
    }
}

#[async_trait]
impl BlobAccess for GrpcCasBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        let request = ReadRequest {
            resource_name: read_resource_name(digest),
            read_offset: 0,
            read_limit: 0,
        };
        let mut responses = self
            .byte_stream
            .clone()
            .read(request)
            .await
            .map_err(|status| not_found_or_remote(digest, status))?
            .into_inner();

        // Servers may report a missing blob through the first stream message
        // rather than the call itself; surface it before handing out a body.
        let first = responses
            .message()
            .await
            .map_err(|status| not_found_or_remote(digest, status))?;

        let head = futures::stream::iter(first.map(|response| Ok(response.data)));
        let tail = responses.map(|response| match response {
            Ok(response) => Ok(response.data),
            Err(status) => Err(BlobError::Remote(status)),
        });
        let body: ByteStream = Box::pin(head.chain(tail));
        Ok(Blob::new(digest.size_bytes(), body))
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        let resource_name = write_resource_name(digest, &Uuid::new_v4());
        debug!(%digest, %resource_name, "uploading blob");

        // An error from the local body cannot travel through the request
        // stream; park it here and end the stream without finish_write.
        let failure: Arc<Mutex<Option<BlobError>>> = Arc::new(Mutex::new(None));
        let slot = failure.clone();
        let requests = blob
            .body
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(
                (Some(resource_name), 0i64),
                move |(resource_name, write_offset): &mut (Option<String>, i64), item| {
                    let request = match item {
                        Some(Ok(data)) if data.is_empty() => Some(None),
                        Some(Ok(data)) => {
                            let request = WriteRequest {
                                resource_name: resource_name.take().unwrap_or_default(),
                                write_offset: *write_offset,
                                finish_write: false,
                                data,
                            };
                            *write_offset += request.data.len() as i64;
                            Some(Some(request))
                        }
                        Some(Err(e)) => {
                            *slot.lock() = Some(e);
                            None
                        }
                        None => Some(Some(WriteRequest {
                            resource_name: resource_name.take().unwrap_or_default(),
                            write_offset: *write_offset,
                            finish_write: true,
                            data: Bytes::new(),
                        })),
                    };
                    future::ready(request)
                },
            )
            .filter_map(future::ready);

        let mut client = self.byte_stream.clone();
        // Boxing the call as an explicitly `Send` future sidesteps a rustc
        // higher-ranked lifetime limitation inside `#[async_trait]`.
        let write: std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = Result<
                            tonic::Response<bb_proto::bytestream::WriteResponse>,
                            tonic::Status,
                        >,
                    > + Send
                    + '_,
            >,
        > = Box::pin(client.write(requests));
        let result = write.await;
        if let Some(e) = failure.lock().take() {
            return Err(e);
        }
        let committed_size = result?.into_inner().committed_size;
        if committed_size != digest.size_bytes() {
            return Err(BlobError::invalid(format!(
                "Remote committed {} bytes, while {} bytes were expected",
                committed_size,
                digest.size_bytes()
            )));
        }
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        let mut by_instance: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for digest in digests {
            by_instance
                .entry(digest.instance())
                .or_default()
                .push(digest.to_proto());
        }

        let calls = by_instance.into_iter().map(|(instance, blob_digests)| {
            let mut cas = self.cas.clone();
            async move {
                let response = cas
                    .find_missing_blobs(FindMissingBlobsRequest {
                        instance_name: instance.to_string(),
                        blob_digests,
                    })
                    .await?
                    .into_inner();
                response
                    .missing_blob_digests
                    .iter()
                    .map(|d| Digest::from_proto(instance, d).map_err(BlobError::from))
                    .collect::<BlobResult<Vec<_>>>()
            }
        });
        let missing = future::try_join_all(calls).await?;
        Ok(missing.into_iter().flatten().collect())
    }
}

/// Action cache on a remote server, storing encoded `ActionResult` messages.
#[derive(Clone)]
pub struct GrpcActionCacheBlobAccess {
    client: ActionCacheClient<Channel>,
    max_size_bytes: i64,
}

impl GrpcActionCacheBlobAccess {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ActionCacheClient::new(channel),
            max_size_bytes: crate::action_cache::DEFAULT_MAX_ACTION_RESULT_SIZE_BYTES,
        }
    }
}

#[async_trait]
impl BlobAccess for GrpcActionCacheBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        let result = self
            .client
            .clone()
            .get_action_result(GetActionResultRequest {
                instance_name: digest.instance().to_string(),
                action_digest: Some(digest.to_proto()),
                ..Default::default()
            })
            .await
            .map_err(|status| not_found_or_remote(digest, status))?
            .into_inner();
        Ok(Blob::from_bytes(result.encode_to_vec()))
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        let data = blob.into_bytes(self.max_size_bytes).await?;
        let action_result = ActionResult::decode(data)?;
        self.client
            .clone()
            .update_action_result(UpdateActionResultRequest {
                instance_name: digest.instance().to_string(),
                action_digest: Some(digest.to_proto()),
                action_result: Some(action_result),
                results_cache_policy: None,
            })
            .await?;
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        let lookups = digests.iter().map(|digest| async move {
            match self.get(digest).await {
                Ok(_) => Ok(None),
                Err(e) if e.is_not_found() => Ok(Some(digest.clone())),
                Err(e) => Err(e),
            }
        });
        let results = future::join_all(lookups).await;
        let mut missing = Vec::new();
        for result in results {
            if let Some(digest) = result? {
                missing.push(digest);
            }
        }
        Ok(missing)
    }
}
