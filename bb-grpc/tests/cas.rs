//! ContentAddressableStorage service.

use std::sync::Arc;

use bb_blob::{BlobAccess, MemoryBlobAccess};
use bb_core::Digest;
use bb_grpc::ContentAddressableStorageService;
use bb_proto::remote_execution::batch_update_blobs_request;
use bb_proto::remote_execution::content_addressable_storage_server::ContentAddressableStorage;
use bb_proto::remote_execution::{
    BatchReadBlobsRequest, BatchUpdateBlobsRequest, FindMissingBlobsRequest, GetTreeRequest,
};
use bytes::Bytes;
use tonic::{Code, Request};

fn setup() -> (ContentAddressableStorageService, Arc<MemoryBlobAccess>) {
    let storage = Arc::new(MemoryBlobAccess::new());
    (ContentAddressableStorageService::new(storage.clone()), storage)
}

#[tokio::test]
async fn test_find_missing_blobs() {
    let (service, storage) = setup();
    let present = Digest::of_bytes("main", b"present");
    let absent = Digest::of_bytes("main", b"absent");
    storage.insert(present.clone(), &b"present"[..]);

    let response = service
        .find_missing_blobs(Request::new(FindMissingBlobsRequest {
            instance_name: "main".to_string(),
            blob_digests: vec![present.to_proto(), absent.to_proto()],
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.missing_blob_digests, vec![absent.to_proto()]);

    let response = service
        .find_missing_blobs(Request::new(FindMissingBlobsRequest {
            instance_name: "main".to_string(),
            blob_digests: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.missing_blob_digests.is_empty());
}

#[tokio::test]
async fn test_find_missing_rejects_malformed_digests() {
    let (service, _) = setup();
    let mut digest = Digest::of_bytes("main", b"x").to_proto();
    digest.hash = "not-a-hash".to_string();

    let status = service
        .find_missing_blobs(Request::new(FindMissingBlobsRequest {
            instance_name: "main".to_string(),
            blob_digests: vec![digest],
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_batch_update_reports_per_entry_status() {
    let (service, storage) = setup();
    let good = Digest::of_bytes("main", b"good");
    let bad = Digest::of_bytes("main", b"bad!");

    let response = service
        .batch_update_blobs(Request::new(BatchUpdateBlobsRequest {
            instance_name: "main".to_string(),
            requests: vec![
                batch_update_blobs_request::Request {
                    digest: Some(good.to_proto()),
                    data: Bytes::from_static(b"good"),
                },
                batch_update_blobs_request::Request {
                    digest: Some(bad.to_proto()),
                    data: Bytes::from_static(b"evil"),
                },
                batch_update_blobs_request::Request {
                    digest: None,
                    data: Bytes::from_static(b"anonymous"),
                },
            ],
        }))
        .await
        .unwrap()
        .into_inner();

    let codes: Vec<i32> = response
        .responses
        .iter()
        .map(|r| r.status.as_ref().unwrap().code)
        .collect();
    assert_eq!(
        codes,
        vec![
            Code::Ok as i32,
            Code::InvalidArgument as i32,
            Code::InvalidArgument as i32
        ]
    );
    assert_eq!(response.responses[0].digest, Some(good.to_proto()));
    assert_eq!(storage.find_missing(&[good, bad.clone()]).await.unwrap(), vec![bad]);
}

#[tokio::test]
async fn test_batch_read_reports_not_found_per_entry() {
    let (service, storage) = setup();
    let present = Digest::of_bytes("main", b"present");
    let absent = Digest::of_bytes("main", b"absent");
    storage.insert(present.clone(), &b"present"[..]);

    let response = service
        .batch_read_blobs(Request::new(BatchReadBlobsRequest {
            instance_name: "main".to_string(),
            digests: vec![present.to_proto(), absent.to_proto()],
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.responses.len(), 2);
    assert_eq!(&response.responses[0].data[..], b"present");
    assert_eq!(response.responses[0].status.as_ref().unwrap().code, Code::Ok as i32);
    assert!(response.responses[1].data.is_empty());
    assert_eq!(
        response.responses[1].status.as_ref().unwrap().code,
        Code::NotFound as i32
    );
}

#[tokio::test]
async fn test_oversized_batches_are_rejected() {
    let storage = Arc::new(MemoryBlobAccess::new());
    let service = ContentAddressableStorageService::new(storage).with_max_batch_total_size_bytes(8);
    let digest = Digest::of_bytes("main", b"0123456789");

    let status = service
        .batch_update_blobs(Request::new(BatchUpdateBlobsRequest {
            instance_name: "main".to_string(),
            requests: vec![batch_update_blobs_request::Request {
                digest: Some(digest.to_proto()),
                data: Bytes::from_static(b"0123456789"),
            }],
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = service
        .batch_read_blobs(Request::new(BatchReadBlobsRequest {
            instance_name: "main".to_string(),
            digests: vec![digest.to_proto()],
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_get_tree_is_unimplemented() {
    let (service, _) = setup();
    let status = service
        .get_tree(Request::new(GetTreeRequest::default()))
        .await
        .err()
        .unwrap();
    assert_eq!(status.code(), Code::Unimplemented);
}
