use async_trait::async_trait;
use bb_core::{BbError, Digest, ErrorKind};

use crate::{Blob, BlobAccess, BlobError, BlobResult};

/// Backend that fails every operation with a fixed error.
///
/// Useful to explicitly disable a storage namespace, or as a placeholder while
/// a real backend is unavailable.
pub struct ErrorBlobAccess {
    kind: ErrorKind,
    message: String,
}

impl ErrorBlobAccess {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn error(&self) -> BlobError {
        BlobError::Core(BbError::new(self.kind, self.message.clone()))
    }
}

#[async_trait]
impl BlobAccess for ErrorBlobAccess {
    async fn get(&self, _digest: &Digest) -> BlobResult<Blob> {
        Err(self.error())
    }

    async fn put(&self, _digest: &Digest, _blob: Blob) -> BlobResult<()> {
        Err(self.error())
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        if digests.is_empty() {
            return Ok(Vec::new());
        }
        Err(self.error())
    }
}
