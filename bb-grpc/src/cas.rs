use std::pin::Pin;
use std::sync::Arc;

use bb_blob::{Blob, BlobAccess};
use bb_builder::MAX_BATCH_TOTAL_SIZE_BYTES;
use bb_core::{BbError, Digest};
use bb_proto::remote_execution as pb;
use bb_proto::remote_execution::content_addressable_storage_server::ContentAddressableStorage;
use bb_proto::remote_execution::{
    batch_read_blobs_response, batch_update_blobs_response, BatchReadBlobsRequest,
    BatchReadBlobsResponse, BatchUpdateBlobsRequest, BatchUpdateBlobsResponse,
    FindMissingBlobsRequest, FindMissingBlobsResponse, GetTreeRequest, GetTreeResponse,
};
use bytes::Bytes;
use futures::{future, Stream};
use tonic::{Request, Response, Status};

use crate::status::to_rpc_status;

/// `ContentAddressableStorage` service over a single blob access.
pub struct ContentAddressableStorageService {
    blob_access: Arc<dyn BlobAccess>,
    max_batch_total_size_bytes: i64,
}

impl ContentAddressableStorageService {
    pub fn new(blob_access: Arc<dyn BlobAccess>) -> Self {
        Self {
            blob_access,
            max_batch_total_size_bytes: MAX_BATCH_TOTAL_SIZE_BYTES,
        }
    }

    pub fn with_max_batch_total_size_bytes(mut self, max_batch_total_size_bytes: i64) -> Self {
        self.max_batch_total_size_bytes = max_batch_total_size_bytes;
        self
    }

    fn check_batch_size(&self, total_size_bytes: i64) -> Result<(), Status> {
        if total_size_bytes > self.max_batch_total_size_bytes {
            return Err(BbError::invalid_argument(format!(
                "Batch is {} bytes in size, while the maximum is {} bytes",
                total_size_bytes, self.max_batch_total_size_bytes
            ))
            .into());
        }
        Ok(())
    }

    async fn update_blob(
        &self,
        instance_name: &str,
        digest: Option<&pb::Digest>,
        data: Bytes,
    ) -> Result<(), Status> {
        let digest = Digest::from_optional_proto(instance_name, digest)?;
        digest.verify(&data)?;
        self.blob_access.put(&digest, Blob::from_bytes(data)).await?;
        Ok(())
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Bytes, Status> {
        let blob = self.blob_access.get(digest).await?;
        Ok(blob.into_bytes(digest.size_bytes()).await?)
    }
}

#[tonic::async_trait]
impl ContentAddressableStorage for ContentAddressableStorageService {
    async fn find_missing_blobs(
        &self,
        request: Request<FindMissingBlobsRequest>,
    ) -> Result<Response<FindMissingBlobsResponse>, Status> {
        let request = request.into_inner();
        let digests = request
            .blob_digests
            .iter()
            .map(|d| Digest::from_proto(&request.instance_name, d))
            .collect::<Result<Vec<_>, _>>()?;
        let missing = self.blob_access.find_missing(&digests).await?;
        Ok(Response::new(FindMissingBlobsResponse {
            missing_blob_digests: missing.iter().map(Digest::to_proto).collect(),
        }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<BatchUpdateBlobsRequest>,
    ) -> Result<Response<BatchUpdateBlobsResponse>, Status> {
        let request = request.into_inner();
        self.check_batch_size(request.requests.iter().map(|r| r.data.len() as i64).sum())?;

        let instance_name = request.instance_name.as_str();
        let updates = request.requests.into_iter().map(|entry| async move {
            let result = self
                .update_blob(instance_name, entry.digest.as_ref(), entry.data)
                .await;
            batch_update_blobs_response::Response {
                digest: entry.digest,
                status: Some(to_rpc_status(result)),
            }
        });
        Ok(Response::new(BatchUpdateBlobsResponse {
            responses: future::join_all(updates).await,
        }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<BatchReadBlobsRequest>,
    ) -> Result<Response<BatchReadBlobsResponse>, Status> {
        let request = request.into_inner();
        let digests = request
            .digests
            .iter()
            .map(|d| Digest::from_proto(&request.instance_name, d))
            .collect::<Result<Vec<_>, _>>()?;
        self.check_batch_size(digests.iter().map(Digest::size_bytes).sum())?;

        let reads = digests.iter().map(|digest| async move {
            let (data, result) = match self.read_blob(digest).await {
                Ok(data) => (data, Ok(())),
                Err(status) => (Bytes::new(), Err(status)),
            };
            batch_read_blobs_response::Response {
                digest: Some(digest.to_proto()),
                data,
                status: Some(to_rpc_status(result)),
            }
        });
        Ok(Response::new(BatchReadBlobsResponse {
            responses: future::join_all(reads).await,
        }))
    }

    type GetTreeStream =
        Pin<Box<dyn Stream<Item = Result<GetTreeResponse, Status>> + Send + 'static>>;

    async fn get_tree(
        &self,
        _request: Request<GetTreeRequest>,
    ) -> Result<Response<Self::GetTreeStream>, Status> {
        Err(BbError::unimplemented(
            "This service does not support downloading directory trees",
        )
        .into())
    }
}
