use std::pin::Pin;

use async_trait::async_trait;
use bb_proto::longrunning::Operation;
use bb_proto::remote_execution::{ExecuteRequest, ServerCapabilities, WaitExecutionRequest};
use futures::Stream;
use tonic::Status;

/// Progress updates of one execution, relayed in order
pub type OperationStream = Pin<Box<dyn Stream<Item = Result<Operation, Status>> + Send + 'static>>;

/// Dispatch target for execution requests
///
/// Dropping a returned [`OperationStream`] abandons the execution; forwarding
/// implementations propagate that to the upstream call.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    /// Describe what the given instance supports.
    async fn get_capabilities(&self, instance_name: &str) -> Result<ServerCapabilities, Status>;

    /// Start executing an action and stream its progress.
    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status>;

    /// Reattach to an execution started earlier.
    async fn wait_execution(
        &self,
        request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status>;
}
