//! bb-core: building blocks shared by every bb-storage crate.

pub mod config;
pub mod digest;
pub mod errors;
pub mod instance;
pub mod rpc_metrics;

pub use config::{endpoint_uri, parse_listen_address, SchedulerEntry, ServerOptions};
pub use digest::{Digest, DigestHasher, SHA256_HEX_LEN};
pub use errors::{BbError, BbResult, ErrorKind};
pub use instance::InstanceName;
pub use rpc_metrics::{RpcMetrics, RpcMetricsBody, RpcMetricsLayer, RpcMetricsService};
