use bb_proto::rpc;
use tonic::Status;

/// Embed a call outcome in a response message, as batch operations report
/// one status per entry.
pub fn to_rpc_status(result: Result<(), Status>) -> rpc::Status {
    match result {
        Ok(()) => rpc::Status::default(),
        Err(status) => rpc::Status {
            code: status.code() as i32,
            message: status.message().to_string(),
            details: Vec::new(),
        },
    }
}
