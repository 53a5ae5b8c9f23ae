//! # Errors
//!
//! bb-storage carries a small set of structured errors whose kinds line up
//! with the gRPC status vocabulary. Core goals:
//! - one kind per status code, so translation to the wire is lossless
//! - remote statuses can be turned back into a `BbError` and re-emitted verbatim
//! - transport-agnostic (the server crate decides how to serialize)

use std::fmt;

use anyhow::Error as AnyError;
use tonic::{Code, Status};

/// A convenience result type for bb-storage core APIs.
pub type BbResult<T> = std::result::Result<T, BbError>;

/// Error kinds, one per gRPC status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ErrorKind {
    pub fn code(&self) -> Code {
        match self {
            ErrorKind::Cancelled => Code::Cancelled,
            ErrorKind::Unknown => Code::Unknown,
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::AlreadyExists => Code::AlreadyExists,
            ErrorKind::PermissionDenied => Code::PermissionDenied,
            ErrorKind::ResourceExhausted => Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => Code::FailedPrecondition,
            ErrorKind::Aborted => Code::Aborted,
            ErrorKind::OutOfRange => Code::OutOfRange,
            ErrorKind::Unimplemented => Code::Unimplemented,
            ErrorKind::Internal => Code::Internal,
            ErrorKind::Unavailable => Code::Unavailable,
            ErrorKind::DataLoss => Code::DataLoss,
            ErrorKind::Unauthenticated => Code::Unauthenticated,
        }
    }

    /// Inverse of [`ErrorKind::code`]. `Code::Ok` has no error kind and maps to `Unknown`.
    pub fn from_code(code: Code) -> Self {
        match code {
            Code::Cancelled => ErrorKind::Cancelled,
            Code::InvalidArgument => ErrorKind::InvalidArgument,
            Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Code::NotFound => ErrorKind::NotFound,
            Code::AlreadyExists => ErrorKind::AlreadyExists,
            Code::PermissionDenied => ErrorKind::PermissionDenied,
            Code::ResourceExhausted => ErrorKind::ResourceExhausted,
            Code::FailedPrecondition => ErrorKind::FailedPrecondition,
            Code::Aborted => ErrorKind::Aborted,
            Code::OutOfRange => ErrorKind::OutOfRange,
            Code::Unimplemented => ErrorKind::Unimplemented,
            Code::Internal => ErrorKind::Internal,
            Code::Unavailable => ErrorKind::Unavailable,
            Code::DataLoss => ErrorKind::DataLoss,
            Code::Unauthenticated => ErrorKind::Unauthenticated,
            Code::Ok | Code::Unknown => ErrorKind::Unknown,
        }
    }

    /// Canonical upper-case status name (e.g. "NOT_FOUND").
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::OutOfRange => "OUT_OF_RANGE",
            ErrorKind::Unimplemented => "UNIMPLEMENTED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::DataLoss => "DATA_LOSS",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

/// A structured bb-storage error.
///
/// - kind (maps onto a gRPC status code)
/// - message (returned to clients)
/// - source (optional, never serialized onto the wire)
#[derive(Debug)]
pub struct BbError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<AnyError>,
}

impl BbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> Code {
        self.kind.code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Convert into a status suitable for returning to clients. The source chain is dropped.
    pub fn into_status(self) -> Status {
        Status::new(self.code(), self.message)
    }

    // ---- Constructors ----

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }
    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, msg)
    }
}

impl fmt::Display for BbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

impl std::error::Error for BbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(&**source),
            None => None,
        }
    }
}

impl From<BbError> for Status {
    fn from(err: BbError) -> Self {
        err.into_status()
    }
}

impl From<Status> for BbError {
    fn from(status: Status) -> Self {
        BbError::new(ErrorKind::from_code(status.code()), status.message())
    }
}
