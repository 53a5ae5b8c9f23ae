use std::sync::Arc;

use async_trait::async_trait;
use bb_core::Digest;
use bb_proto::remote_execution::ActionResult;
use prost::Message;

use crate::{Blob, BlobAccess, BlobResult};

/// Default upper bound for a stored action result.
pub const DEFAULT_MAX_ACTION_RESULT_SIZE_BYTES: i64 = 16 * 1024 * 1024;

/// Store mapping an action's digest to its previously computed result
#[async_trait]
pub trait ActionCache: Send + Sync {
    /// Look up the result of an action. Fails with not found when none is cached.
    async fn get_action_result(&self, action_digest: &Digest) -> BlobResult<ActionResult>;

    /// Record the result of an action, replacing any previous entry.
    async fn put_action_result(
        &self,
        action_digest: &Digest,
        result: &ActionResult,
    ) -> BlobResult<()>;
}

/// Action cache stored in a blob access namespace, one encoded `ActionResult` per action digest
pub struct BlobAccessActionCache {
    blob_access: Arc<dyn BlobAccess>,
    max_size_bytes: i64,
}

impl BlobAccessActionCache {
    pub fn new(blob_access: Arc<dyn BlobAccess>) -> Self {
        Self {
            blob_access,
            max_size_bytes: DEFAULT_MAX_ACTION_RESULT_SIZE_BYTES,
        }
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: i64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }
}

#[async_trait]
impl ActionCache for BlobAccessActionCache {
    async fn get_action_result(&self, action_digest: &Digest) -> BlobResult<ActionResult> {
        let blob = self.blob_access.get(action_digest).await?;
        let data = blob.into_bytes(self.max_size_bytes).await?;
        Ok(ActionResult::decode(data)?)
    }

    async fn put_action_result(
        &self,
        action_digest: &Digest,
        result: &ActionResult,
    ) -> BlobResult<()> {
        let data = result.encode_to_vec();
        self.blob_access
            .put(action_digest, Blob::from_bytes(data))
            .await
    }
}
