use std::sync::Arc;

use async_trait::async_trait;
use bb_core::{endpoint_uri, BbError, BbResult, RpcMetrics, RpcMetricsLayer, RpcMetricsService};
use bb_proto::remote_execution::capabilities_client::CapabilitiesClient;
use bb_proto::remote_execution::execution_client::ExecutionClient;
use bb_proto::remote_execution::{
    ExecuteRequest, GetCapabilitiesRequest, ServerCapabilities, WaitExecutionRequest,
};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tower::Layer;

use crate::{BuildQueue, OperationStream};

/// Proxy to a remote scheduler.
///
/// Operation streams are relayed as received. The returned stream owns the
/// upstream call, so dropping it cancels the call on the scheduler.
/// Every call is counted in the client-side `metrics`.
#[derive(Clone)]
pub struct ForwardingBuildQueue {
    execution: ExecutionClient<RpcMetricsService<Channel>>,
    capabilities: CapabilitiesClient<RpcMetricsService<Channel>>,
}

impl ForwardingBuildQueue {
    pub fn new(channel: Channel, metrics: Arc<RpcMetrics>) -> Self {
        let channel = RpcMetricsLayer::new(metrics).layer(channel);
        Self {
            execution: ExecutionClient::new(channel.clone()),
            capabilities: CapabilitiesClient::new(channel),
        }
    }

    /// Create a queue for `endpoint` without dialling it yet.
    ///
    /// Bare `host:port` endpoints are reached in plaintext.
    pub fn connect_lazy(endpoint: &str, metrics: Arc<RpcMetrics>) -> BbResult<Self> {
        let uri = endpoint_uri(endpoint);
        let channel = Endpoint::from_shared(uri.clone())
            .map_err(|e| {
                BbError::invalid_argument(format!("Invalid scheduler endpoint {}", uri))
                    .with_source(e.into())
            })?
            .connect_lazy();
        Ok(Self::new(channel, metrics))
    }
}

#[async_trait]
impl BuildQueue for ForwardingBuildQueue {
    async fn get_capabilities(&self, instance_name: &str) -> Result<ServerCapabilities, Status> {
        let response = self
            .capabilities
            .clone()
            .get_capabilities(GetCapabilitiesRequest {
                instance_name: instance_name.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status> {
        let stream = self.execution.clone().execute(request).await?.into_inner();
        Ok(Box::pin(stream))
    }

    async fn wait_execution(
        &self,
        request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        let stream = self
            .execution
            .clone()
            .wait_execution(request)
            .await?
            .into_inner();
        Ok(Box::pin(stream))
    }
}
