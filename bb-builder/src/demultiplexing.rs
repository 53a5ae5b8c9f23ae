use std::sync::Arc;

use async_trait::async_trait;
use bb_proto::remote_execution::{ExecuteRequest, ServerCapabilities, WaitExecutionRequest};
use tonic::Status;
use tracing::debug;

use crate::{BuildQueue, OperationStream};

/// Resolves the queue serving an instance name.
pub type BuildQueueGetter = Box<dyn Fn(&str) -> Option<Arc<dyn BuildQueue>> + Send + Sync>;

/// Routes each call to the queue registered for its instance name.
///
/// Unknown instance names are rejected before any backend is contacted.
pub struct DemultiplexingBuildQueue {
    get_backend: BuildQueueGetter,
}

impl DemultiplexingBuildQueue {
    pub fn new<F>(get_backend: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn BuildQueue>> + Send + Sync + 'static,
    {
        Self {
            get_backend: Box::new(get_backend),
        }
    }

    fn backend(&self, instance_name: &str) -> Result<Arc<dyn BuildQueue>, Status> {
        (self.get_backend)(instance_name).ok_or_else(|| {
            debug!(instance_name, "request for unknown instance");
            Status::invalid_argument(format!("Unknown instance name: {:?}", instance_name))
        })
    }
}

#[async_trait]
impl BuildQueue for DemultiplexingBuildQueue {
    async fn get_capabilities(&self, instance_name: &str) -> Result<ServerCapabilities, Status> {
        self.backend(instance_name)?
            .get_capabilities(instance_name)
            .await
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status> {
        let backend = self.backend(&request.instance_name)?;
        backend.execute(request).await
    }

    /// Operation names carry no instance name, so there is nothing to route on.
    async fn wait_execution(
        &self,
        _request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        Err(Status::unimplemented(
            "WaitExecution cannot be routed, as operation names carry no instance name",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NonExecutableBuildQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tonic::Code;

    /// Counts every call that reaches it.
    #[derive(Default)]
    struct CountingBuildQueue {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BuildQueue for CountingBuildQueue {
        async fn get_capabilities(&self, _: &str) -> Result<ServerCapabilities, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ServerCapabilities::default())
        }

        async fn execute(&self, _: ExecuteRequest) -> Result<OperationStream, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn wait_execution(
            &self,
            _: WaitExecutionRequest,
        ) -> Result<OperationStream, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn demultiplexer(backend: Arc<CountingBuildQueue>) -> DemultiplexingBuildQueue {
        DemultiplexingBuildQueue::new(move |instance_name| match instance_name {
            "debian8" => Some(backend.clone() as Arc<dyn BuildQueue>),
            "cache-only" => Some(Arc::new(NonExecutableBuildQueue::new()) as Arc<dyn BuildQueue>),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_unknown_instance_never_reaches_a_backend() {
        let backend = Arc::new(CountingBuildQueue::default());
        let queue = demultiplexer(backend.clone());

        let err = queue
            .execute(ExecuteRequest {
                instance_name: "ubuntu".to_string(),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = queue.get_capabilities("ubuntu").await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_known_instance_is_delegated() {
        let backend = Arc::new(CountingBuildQueue::default());
        let queue = demultiplexer(backend.clone());

        queue.get_capabilities("debian8").await.unwrap();
        assert!(queue
            .execute(ExecuteRequest {
                instance_name: "debian8".to_string(),
                ..Default::default()
            })
            .await
            .is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delegate_failures_surface_verbatim() {
        let queue = demultiplexer(Arc::new(CountingBuildQueue::default()));
        let err = queue
            .execute(ExecuteRequest {
                instance_name: "cache-only".to_string(),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::Unimplemented);
        assert!(queue.get_capabilities("cache-only").await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_execution_is_unimplemented() {
        let backend = Arc::new(CountingBuildQueue::default());
        let queue = demultiplexer(backend.clone());
        let err = queue
            .wait_execution(WaitExecutionRequest {
                name: "operations/1234".to_string(),
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::Unimplemented);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
