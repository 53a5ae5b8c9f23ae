use bb_core::{BbError, Digest};
use thiserror::Error;
use tonic::{Code, Status};

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {digest}")]
    NotFound { digest: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Blob corrupted: {message}")]
    Corrupted { message: String },

    #[error("Invalid storage configuration: {message}")]
    Configuration { message: String },

    #[error("Remote storage error: {0}")]
    Remote(#[from] Status),

    #[error(transparent)]
    Core(#[from] BbError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Malformed storage configuration: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Failed to decode stored message: {source}")]
    Decode {
        #[from]
        source: prost::DecodeError,
    },
}

impl BlobError {
    /// Create a not found error for a digest
    pub fn not_found(digest: &Digest) -> Self {
        Self::NotFound {
            digest: digest.to_string(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a corruption error
    pub fn corrupted<S: Into<String>>(message: S) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The status code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Self::NotFound { .. } => Code::NotFound,
            Self::Invalid { .. } => Code::InvalidArgument,
            Self::Remote(status) => status.code(),
            Self::Core(err) => err.code(),
            Self::Corrupted { .. }
            | Self::Configuration { .. }
            | Self::Io { .. }
            | Self::Serialization { .. }
            | Self::Decode { .. } => Code::Internal,
        }
    }

    /// Whether the blob simply does not exist, regardless of which layer reported it.
    pub fn is_not_found(&self) -> bool {
        self.code() == Code::NotFound
    }
}

impl From<BlobError> for Status {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Remote(status) => status,
            BlobError::Core(err) => err.into_status(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_core::ErrorKind;

    #[test]
    fn test_remote_status_passes_through_verbatim() {
        let err = BlobError::from(Status::unavailable("scheduler down"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "scheduler down");
    }

    #[test]
    fn test_not_found_is_detected_across_layers() {
        let digest = Digest::of_bytes("main", b"x");
        assert!(BlobError::not_found(&digest).is_not_found());
        assert!(BlobError::from(Status::not_found("gone")).is_not_found());
        assert!(BlobError::from(BbError::new(ErrorKind::NotFound, "gone")).is_not_found());
        assert!(!BlobError::corrupted("bad").is_not_found());
    }

    #[test]
    fn test_corruption_is_reported_as_internal() {
        let status: Status = BlobError::corrupted("checksum mismatch").into();
        assert_eq!(status.code(), Code::Internal);
    }
}
