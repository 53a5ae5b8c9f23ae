use async_trait::async_trait;
use bb_proto::remote_execution::{
    digest_function, symlink_absolute_path_strategy, ActionCacheUpdateCapabilities,
    CacheCapabilities, ExecuteRequest, ExecutionCapabilities, ServerCapabilities,
    WaitExecutionRequest,
};
use bb_proto::semver::SemVer;
use tonic::Status;

use crate::{BuildQueue, OperationStream};

/// Largest batch a client may send in one `BatchUpdateBlobs`/`BatchReadBlobs` call.
pub const MAX_BATCH_TOTAL_SIZE_BYTES: i64 = 4 * 1024 * 1024;

/// Queue for instances that have storage but no scheduler.
///
/// Capability queries succeed and advertise caching only, so clients that
/// upload results into the action cache still see a well-formed server.
/// Execution is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonExecutableBuildQueue;

impl NonExecutableBuildQueue {
    pub fn new() -> Self {
        Self
    }
}

fn api_version() -> SemVer {
    SemVer {
        major: 2,
        minor: 0,
        patch: 0,
        prerelease: String::new(),
    }
}

#[async_trait]
impl BuildQueue for NonExecutableBuildQueue {
    async fn get_capabilities(&self, _instance_name: &str) -> Result<ServerCapabilities, Status> {
        Ok(ServerCapabilities {
            cache_capabilities: Some(CacheCapabilities {
                digest_function: vec![digest_function::Value::Sha256 as i32],
                action_cache_update_capabilities: Some(ActionCacheUpdateCapabilities {
                    update_enabled: true,
                }),
                cache_priority_capabilities: None,
                max_batch_total_size_bytes: MAX_BATCH_TOTAL_SIZE_BYTES,
                symlink_absolute_path_strategy:
                    symlink_absolute_path_strategy::Value::Disallowed as i32,
            }),
            execution_capabilities: Some(ExecutionCapabilities {
                digest_function: digest_function::Value::Sha256 as i32,
                exec_enabled: false,
                execution_priority_capabilities: None,
            }),
            deprecated_api_version: None,
            low_api_version: Some(api_version()),
            high_api_version: Some(api_version()),
        })
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<OperationStream, Status> {
        Err(Status::unimplemented(format!(
            "Instance {:?} is not capable of executing build actions",
            request.instance_name
        )))
    }

    async fn wait_execution(
        &self,
        _request: WaitExecutionRequest,
    ) -> Result<OperationStream, Status> {
        Err(Status::unimplemented(
            "This instance is not capable of executing build actions",
        ))
    }
}
