use std::sync::Arc;

use bb_builder::{BuildQueue, OperationStream};
use bb_proto::remote_execution::capabilities_server::Capabilities;
use bb_proto::remote_execution::execution_server::Execution;
use bb_proto::remote_execution::{
    ExecuteRequest, GetCapabilitiesRequest, ServerCapabilities, WaitExecutionRequest,
};
use tonic::{Request, Response, Status};

/// `Execution` and `Capabilities` services backed by one build queue.
#[derive(Clone)]
pub struct ExecutionService {
    build_queue: Arc<dyn BuildQueue>,
}

impl ExecutionService {
    pub fn new(build_queue: Arc<dyn BuildQueue>) -> Self {
        Self { build_queue }
    }
}

#[tonic::async_trait]
impl Execution for ExecutionService {
    type ExecuteStream = OperationStream;
    type WaitExecutionStream = OperationStream;

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<Self::ExecuteStream>, Status> {
        let stream = self.build_queue.execute(request.into_inner()).await?;
        Ok(Response::new(stream))
    }

    async fn wait_execution(
        &self,
        request: Request<WaitExecutionRequest>,
    ) -> Result<Response<Self::WaitExecutionStream>, Status> {
        let stream = self.build_queue.wait_execution(request.into_inner()).await?;
        Ok(Response::new(stream))
    }
}

#[tonic::async_trait]
impl Capabilities for ExecutionService {
    async fn get_capabilities(
        &self,
        request: Request<GetCapabilitiesRequest>,
    ) -> Result<Response<ServerCapabilities>, Status> {
        let capabilities = self
            .build_queue
            .get_capabilities(&request.into_inner().instance_name)
            .await?;
        Ok(Response::new(capabilities))
    }
}
