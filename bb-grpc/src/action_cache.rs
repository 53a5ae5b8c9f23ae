use std::collections::BTreeSet;
use std::sync::Arc;

use bb_blob::ActionCache;
use bb_core::{BbError, Digest, InstanceName};
use bb_proto::remote_execution::action_cache_server::ActionCache as ActionCacheRpc;
use bb_proto::remote_execution::{ActionResult, GetActionResultRequest, UpdateActionResultRequest};
use tonic::{Request, Response, Status};
use tracing::warn;

/// `ActionCache` service. Reads are unrestricted; writes are accepted only
/// for allow-listed instances.
pub struct ActionCacheService {
    action_cache: Arc<dyn ActionCache>,
    allow_updates_for_instances: BTreeSet<InstanceName>,
}

impl ActionCacheService {
    pub fn new(
        action_cache: Arc<dyn ActionCache>,
        allow_updates_for_instances: BTreeSet<InstanceName>,
    ) -> Self {
        Self {
            action_cache,
            allow_updates_for_instances,
        }
    }
}

#[tonic::async_trait]
impl ActionCacheRpc for ActionCacheService {
    async fn get_action_result(
        &self,
        request: Request<GetActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let request = request.into_inner();
        let digest =
            Digest::from_optional_proto(&request.instance_name, request.action_digest.as_ref())?;
        let result = self.action_cache.get_action_result(&digest).await?;
        Ok(Response::new(result))
    }

    async fn update_action_result(
        &self,
        request: Request<UpdateActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let request = request.into_inner();
        if !self
            .allow_updates_for_instances
            .contains(request.instance_name.as_str())
        {
            warn!(instance_name = %request.instance_name, "rejected action cache update");
            return Err(BbError::permission_denied(format!(
                "This service does not accept Action Cache updates for instance {:?}",
                request.instance_name
            ))
            .into());
        }

        let digest =
            Digest::from_optional_proto(&request.instance_name, request.action_digest.as_ref())?;
        let result = request
            .action_result
            .ok_or_else(|| BbError::invalid_argument("No action result provided"))?;
        self.action_cache.put_action_result(&digest, &result).await?;
        Ok(Response::new(result))
    }
}
