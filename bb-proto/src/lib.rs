//! # bb-proto
//!
//! Generated bindings for the wire protocols spoken by bb-storage:
//!
//! - `build.bazel.remote.execution.v2`: ActionCache, ContentAddressableStorage,
//!   Execution and Capabilities services
//! - `google.bytestream`: chunked, resumable blob transfer
//! - `google.longrunning` / `google.rpc`: execution progress and status payloads
//!
//! Module nesting mirrors the protobuf package names so that cross-package
//! references in the generated code resolve.

pub mod build {
    pub mod bazel {
        pub mod remote {
            pub mod execution {
                pub mod v2 {
                    tonic::include_proto!("build.bazel.remote.execution.v2");
                }
            }
        }

        pub mod semver {
            tonic::include_proto!("build.bazel.semver");
        }
    }
}

pub mod google {
    pub mod bytestream {
        tonic::include_proto!("google.bytestream");
    }

    pub mod longrunning {
        tonic::include_proto!("google.longrunning");
    }

    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}

/// Short alias for the remote execution API package.
pub use build::bazel::remote::execution::v2 as remote_execution;
pub use build::bazel::semver;
pub use google::bytestream;
pub use google::longrunning;
pub use google::rpc;
