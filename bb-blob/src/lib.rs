//! # bb-blob: content-addressed blob access
//!
//! `bb-blob` provides the storage layer behind bb-storage's protocol servers:
//! a single [`BlobAccess`] contract with one implementation per backend kind,
//! plus the action cache built on top of it.
//!
//! ## Key Features
//!
//! - **Streaming-first**: blob bodies are streams, large blobs are never buffered by the layer itself
//! - **Pluggable backends**: memory, remote gRPC, size-based splitting, fixed errors
//! - **Content-addressing guard**: every CAS backend is wrapped in checksum validation
//! - **Declarative**: both storage namespaces are resolved from one JSON configuration file
//!
//! ## Quick Start
//!
//! ```rust
//! use bb_blob::prelude::*;
//! use bb_core::Digest;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let cas = MemoryBlobAccess::new();
//! let digest = Digest::of_bytes("main", b"Hello, world!");
//!
//! cas.put(&digest, Blob::from_bytes(&b"Hello, world!"[..])).await?;
//! let data = cas.get(&digest).await?.into_bytes(1024).await?;
//! assert_eq!(&data[..], b"Hello, world!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   Protocol servers   │  ← bb-grpc
//! ├──────────────────────┤
//! │  Metrics/Validating  │  ← wrappers added by configuration
//! ├──────────────────────┤
//! │      BlobAccess      │  ← Memory, Grpc, SizeDistinguishing, Error
//! └──────────────────────┘
//! ```

pub mod action_cache;
mod blob_access;
pub mod configuration;
mod error;
mod error_blob_access;
pub mod grpc;
mod memory;
mod metrics;
mod size_distinguishing;
mod types;
mod validating;

pub use action_cache::{ActionCache, BlobAccessActionCache};
pub use blob_access::BlobAccess;
pub use configuration::{
    create_blob_access_objects, create_blob_access_objects_from_config,
    new_blob_access_from_configuration, BlobAccessConfiguration, BlobAccessPair,
    BlobstoreConfiguration, StorageType,
};
pub use error::{BlobError, BlobResult};
pub use error_blob_access::ErrorBlobAccess;
pub use grpc::{GrpcActionCacheBlobAccess, GrpcCasBlobAccess};
pub use memory::MemoryBlobAccess;
pub use metrics::{BlobAccessMetrics, MetricsBlobAccess};
pub use size_distinguishing::SizeDistinguishingBlobAccess;
pub use types::{chunked, collect_bytes, Blob, ByteStream};
pub use validating::ValidatingBlobAccess;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ActionCache, Blob, BlobAccess, BlobAccessActionCache, BlobError, BlobResult, ByteStream,
        MemoryBlobAccess,
    };
}
