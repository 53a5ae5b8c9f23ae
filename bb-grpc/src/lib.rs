//! bb-grpc: gRPC protocol servers for bb-storage.
//!
//! Each service adapts the storage or dispatch layer to the wire protocol and
//! translates failures into status codes. The stream-level entry points of
//! the ByteStream service ([`handle_read`], [`handle_write`]) are public so
//! they can be driven without a transport.

mod action_cache;
mod bytestream;
mod cas;
mod execution;
mod server;
mod status;

pub use action_cache::ActionCacheService;
pub use bytestream::{
    handle_read, handle_write, parse_read_resource_name, parse_write_resource_name,
    ByteStreamService, ReadResponseStream, UploadSession, DEFAULT_READ_CHUNK_SIZE,
};
pub use cas::ContentAddressableStorageService;
pub use execution::ExecutionService;
pub use server::StorageServer;
pub use status::to_rpc_status;
