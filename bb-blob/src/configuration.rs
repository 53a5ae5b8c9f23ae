//! Declarative backend configuration.
//!
//! The storage configuration file is JSON. Each namespace is described by a
//! tagged backend, and composite backends nest further backends:
//!
//! ```json
//! {
//!   "content_addressable_storage": {
//!     "size_distinguishing": {
//!       "small": { "memory": {} },
//!       "large": { "grpc": { "endpoint": "storage-large:8980" } },
//!       "cutoff_size_bytes": 1048576
//!     }
//!   },
//!   "action_cache": { "memory": {} }
//! }
//! ```
//!
//! Resolution happens once at startup. Any failure (unreadable file, malformed
//! JSON, bad endpoint) is returned to the caller, which is expected to abort.

use std::path::Path;
use std::sync::Arc;

use bb_core::{endpoint_uri, ErrorKind};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use tonic::transport::Endpoint;
use tonic::Code;
use tracing::info;

use crate::{
    BlobAccess, BlobAccessMetrics, BlobError, BlobResult, ErrorBlobAccess,
    GrpcActionCacheBlobAccess, GrpcCasBlobAccess, MemoryBlobAccess, MetricsBlobAccess,
    SizeDistinguishingBlobAccess, ValidatingBlobAccess,
};

/// Contents of the storage configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobstoreConfiguration {
    pub content_addressable_storage: BlobAccessConfiguration,
    pub action_cache: BlobAccessConfiguration,
}

/// One backend, possibly composed of further backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobAccessConfiguration {
    /// In-process storage, lost on restart.
    Memory {},
    /// Another storage service, reached over gRPC.
    Grpc { endpoint: String },
    /// Fail every request with a gRPC status code (numeric, as in `google.rpc.Code`).
    Error { code: i32, message: String },
    /// Split by blob size: `size_bytes <= cutoff_size_bytes` goes to `small`.
    SizeDistinguishing {
        small: Box<BlobAccessConfiguration>,
        large: Box<BlobAccessConfiguration>,
        cutoff_size_bytes: i64,
    },
}

/// Namespace a backend is created for. Remote backends speak a different
/// service depending on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    ContentAddressableStorage,
    ActionCache,
}

impl StorageType {
    fn name(&self) -> &'static str {
        match self {
            StorageType::ContentAddressableStorage => "cas",
            StorageType::ActionCache => "ac",
        }
    }
}

/// The two process-wide storage handles.
#[derive(Clone)]
pub struct BlobAccessPair {
    pub content_addressable_storage: Arc<dyn BlobAccess>,
    pub action_cache: Arc<dyn BlobAccess>,
}

/// Build one backend tree.
pub fn new_blob_access_from_configuration(
    config: &BlobAccessConfiguration,
    storage_type: StorageType,
) -> BlobResult<Arc<dyn BlobAccess>> {
    let backend: Arc<dyn BlobAccess> = match config {
        BlobAccessConfiguration::Memory {} => Arc::new(MemoryBlobAccess::new()),
        BlobAccessConfiguration::Grpc { endpoint } => {
            let uri = endpoint_uri(endpoint);
            let channel = Endpoint::from_shared(uri.clone())
                .map_err(|e| {
                    BlobError::configuration(format!("Invalid gRPC endpoint {}: {}", uri, e))
                })?
                .connect_lazy();
            match storage_type {
                StorageType::ContentAddressableStorage => {
                    Arc::new(GrpcCasBlobAccess::new(channel))
                }
                StorageType::ActionCache => Arc::new(GrpcActionCacheBlobAccess::new(channel)),
            }
        }
        BlobAccessConfiguration::Error { code, message } => {
            let code = Code::from_i32(*code);
            if code == Code::Ok {
                return Err(BlobError::configuration(
                    "Error backend cannot be configured with status code OK",
                ));
            }
            Arc::new(ErrorBlobAccess::new(ErrorKind::from_code(code), message.clone()))
        }
        BlobAccessConfiguration::SizeDistinguishing {
            small,
            large,
            cutoff_size_bytes,
        } => Arc::new(SizeDistinguishingBlobAccess::new(
            new_blob_access_from_configuration(small, storage_type)?,
            new_blob_access_from_configuration(large, storage_type)?,
            *cutoff_size_bytes,
        )),
    };
    Ok(backend)
}

/// Build both namespaces, registering their metrics with `registry`.
///
/// Content addressable storage is always wrapped in checksum validation.
pub fn create_blob_access_objects(
    config: &BlobstoreConfiguration,
    registry: &Registry,
) -> BlobResult<BlobAccessPair> {
    let metrics = BlobAccessMetrics::register(registry)?;

    let cas = new_blob_access_from_configuration(
        &config.content_addressable_storage,
        StorageType::ContentAddressableStorage,
    )?;
    let cas: Arc<dyn BlobAccess> = Arc::new(ValidatingBlobAccess::new(cas));
    let ac = new_blob_access_from_configuration(&config.action_cache, StorageType::ActionCache)?;

    Ok(BlobAccessPair {
        content_addressable_storage: Arc::new(MetricsBlobAccess::new(
            cas,
            StorageType::ContentAddressableStorage.name(),
            metrics.clone(),
        )),
        action_cache: Arc::new(MetricsBlobAccess::new(
            ac,
            StorageType::ActionCache.name(),
            metrics,
        )),
    })
}

/// Read the configuration file at `path` and build both namespaces.
pub async fn create_blob_access_objects_from_config(
    path: impl AsRef<Path>,
    registry: &Registry,
) -> BlobResult<BlobAccessPair> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let config: BlobstoreConfiguration = serde_json::from_slice(&data)?;
    info!(path = %path.display(), ?config, "loaded storage configuration");
    create_blob_access_objects(&config, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blob;
    use bb_core::Digest;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "content_addressable_storage": {
            "size_distinguishing": {
                "small": { "memory": {} },
                "large": { "error": { "code": 14, "message": "Large blobs are offline" } },
                "cutoff_size_bytes": 16
            }
        },
        "action_cache": { "memory": {} }
    }"#;

    #[test]
    fn test_parse_nested_configuration() {
        let config: BlobstoreConfiguration = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.action_cache, BlobAccessConfiguration::Memory {});
        match config.content_addressable_storage {
            BlobAccessConfiguration::SizeDistinguishing {
                small,
                large,
                cutoff_size_bytes,
            } => {
                assert_eq!(*small, BlobAccessConfiguration::Memory {});
                assert_eq!(
                    *large,
                    BlobAccessConfiguration::Error {
                        code: 14,
                        message: "Large blobs are offline".to_string()
                    }
                );
                assert_eq!(cutoff_size_bytes, 16);
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = serde_json::from_str::<BlobAccessConfiguration>(r#"{ "redis": {} }"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_configured_tree_routes_by_size() {
        let config: BlobstoreConfiguration = serde_json::from_str(SAMPLE).unwrap();
        let pair = create_blob_access_objects(&config, &Registry::new()).unwrap();

        let small = Digest::of_bytes("main", b"tiny");
        pair.content_addressable_storage
            .put(&small, Blob::from_bytes(&b"tiny"[..]))
            .await
            .unwrap();
        assert!(pair
            .content_addressable_storage
            .find_missing(&[small.clone()])
            .await
            .unwrap()
            .is_empty());

        let large_data = vec![7u8; 64];
        let large = Digest::of_bytes("main", &large_data);
        let err = pair
            .content_addressable_storage
            .put(&large, Blob::from_bytes(large_data))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_cas_rejects_mismatching_content() {
        let config: BlobstoreConfiguration = serde_json::from_str(SAMPLE).unwrap();
        let pair = create_blob_access_objects(&config, &Registry::new()).unwrap();

        let digest = Digest::of_bytes("main", b"good");
        let err = pair
            .content_addressable_storage
            .put(&digest, Blob::from_bytes(&b"evil"[..]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_grpc_backends_connect_lazily() {
        let config = BlobstoreConfiguration {
            content_addressable_storage: BlobAccessConfiguration::Grpc {
                endpoint: "storage:8980".to_string(),
            },
            action_cache: BlobAccessConfiguration::Grpc {
                endpoint: "http://storage:8980".to_string(),
            },
        };
        assert!(create_blob_access_objects(&config, &Registry::new()).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_a_configuration_error() {
        let config = BlobAccessConfiguration::Grpc {
            endpoint: "not a uri".to_string(),
        };
        let result = new_blob_access_from_configuration(&config, StorageType::ActionCache);
        assert!(matches!(result, Err(BlobError::Configuration { .. })));
    }

    #[test]
    fn test_error_backend_requires_failure_code() {
        let config = BlobAccessConfiguration::Error {
            code: 0,
            message: "fine".to_string(),
        };
        let result = new_blob_access_from_configuration(&config, StorageType::ActionCache);
        assert!(matches!(result, Err(BlobError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let pair = create_blob_access_objects_from_config(file.path(), &Registry::new())
            .await
            .unwrap();
        let digest = Digest::of_bytes("main", b"action");
        assert!(pair.action_cache.get(&digest).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("blobstore.conf");
        let result = create_blob_access_objects_from_config(&missing, &Registry::new()).await;
        assert!(matches!(result, Err(BlobError::Io { .. })));

        std::fs::write(&missing, "{ \"action_cache\": ").unwrap();
        let result = create_blob_access_objects_from_config(&missing, &Registry::new()).await;
        assert!(matches!(result, Err(BlobError::Serialization { .. })));
    }
}
