use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use bb_blob::{ActionCache, BlobAccess};
use bb_builder::BuildQueue;
use bb_core::{InstanceName, RpcMetrics, RpcMetricsLayer};
use bb_proto::bytestream::byte_stream_server::ByteStreamServer;
use bb_proto::remote_execution::action_cache_server::ActionCacheServer;
use bb_proto::remote_execution::capabilities_server::CapabilitiesServer;
use bb_proto::remote_execution::content_addressable_storage_server::ContentAddressableStorageServer;
use bb_proto::remote_execution::execution_server::ExecutionServer;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    ActionCacheService, ByteStreamService, ContentAddressableStorageService, ExecutionService,
    DEFAULT_READ_CHUNK_SIZE,
};

/// Batch requests carry up to 4 MiB of payload plus framing.
const MAX_DECODING_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// All bb-storage gRPC services on one listener.
pub struct StorageServer {
    content_addressable_storage: Arc<dyn BlobAccess>,
    action_cache: Arc<dyn ActionCache>,
    build_queue: Arc<dyn BuildQueue>,
    allow_ac_updates_for_instances: BTreeSet<InstanceName>,
    read_chunk_size: usize,
    rpc_metrics: Option<Arc<RpcMetrics>>,
}

impl StorageServer {
    pub fn new(
        content_addressable_storage: Arc<dyn BlobAccess>,
        action_cache: Arc<dyn ActionCache>,
        build_queue: Arc<dyn BuildQueue>,
    ) -> Self {
        Self {
            content_addressable_storage,
            action_cache,
            build_queue,
            allow_ac_updates_for_instances: BTreeSet::new(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            rpc_metrics: None,
        }
    }

    pub fn allow_ac_updates_for_instances<I>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = InstanceName>,
    {
        self.allow_ac_updates_for_instances.extend(instances);
        self
    }

    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }

    /// Per-call counters and handling time of every served RPC. Without
    /// this, calls are counted in a registry nobody exports.
    pub fn rpc_metrics(mut self, rpc_metrics: Arc<RpcMetrics>) -> Self {
        self.rpc_metrics = Some(rpc_metrics);
        self
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn listen<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let rpc_metrics = match self.rpc_metrics {
            Some(rpc_metrics) => rpc_metrics,
            None => RpcMetrics::server(&Registry::new())?,
        };
        let execution = Arc::new(ExecutionService::new(self.build_queue));
        let action_cache =
            ActionCacheService::new(self.action_cache, self.allow_ac_updates_for_instances);
        let cas = ContentAddressableStorageService::new(self.content_addressable_storage.clone());
        let byte_stream = ByteStreamService::new(self.content_addressable_storage)
            .with_read_chunk_size(self.read_chunk_size);

        info!(address = ?listener.local_addr().ok(), "serving gRPC");
        Server::builder()
            .layer(TraceLayer::new_for_grpc())
            .layer(RpcMetricsLayer::new(rpc_metrics))
            .add_service(ActionCacheServer::new(action_cache))
            .add_service(
                ContentAddressableStorageServer::new(cas)
                    .max_decoding_message_size(MAX_DECODING_MESSAGE_SIZE)
                    .max_encoding_message_size(MAX_DECODING_MESSAGE_SIZE),
            )
            .add_service(ByteStreamServer::new(byte_stream))
            .add_service(CapabilitiesServer::from_arc(execution.clone()))
            .add_service(ExecutionServer::from_arc(execution))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        Ok(())
    }
}
