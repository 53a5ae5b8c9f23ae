//! # Process options
//!
//! The options bb-storage is started with, independent of how they were
//! obtained (command line, tests). The storage backend configuration itself
//! lives in a separate file, referenced by path, and is resolved by `bb-blob`.
//!
//! Scheduler entries use the `NAME|ENDPOINT` form:
//!
//! ```rust
//! use bb_core::SchedulerEntry;
//!
//! let entry: SchedulerEntry = "debian8|debian8-scheduler:8981".parse().unwrap();
//! assert_eq!(entry.instance_name.as_str(), "debian8");
//! assert_eq!(entry.endpoint_uri(), "http://debian8-scheduler:8981");
//! ```

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{BbError, BbResult};
use crate::instance::InstanceName;

/// A backend capable of executing build actions for one instance name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerEntry {
    pub instance_name: InstanceName,
    pub endpoint: String,
}

impl SchedulerEntry {
    /// Endpoint as a URI; bare `host:port` endpoints are dialled in plaintext.
    pub fn endpoint_uri(&self) -> String {
        endpoint_uri(&self.endpoint)
    }
}

/// Add the plaintext `http://` scheme to endpoints given as `host:port`.
pub fn endpoint_uri(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

impl FromStr for SchedulerEntry {
    type Err = BbError;

    fn from_str(s: &str) -> BbResult<Self> {
        match s.split_once('|') {
            Some((instance_name, endpoint)) if !endpoint.is_empty() => Ok(Self {
                instance_name: InstanceName::from(instance_name),
                endpoint: endpoint.to_string(),
            }),
            _ => Err(BbError::invalid_argument(format!(
                "Invalid scheduler entry: {}",
                s
            ))),
        }
    }
}

/// Everything the storage front end needs to start serving.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Path of the storage backend configuration file.
    pub blobstore_config: PathBuf,
    /// Address of the metrics/health HTTP endpoint.
    pub web_listen_address: SocketAddr,
    /// Address of the gRPC service.
    pub grpc_listen_address: SocketAddr,
    pub schedulers: Vec<SchedulerEntry>,
    pub allow_ac_updates_for_instances: Vec<InstanceName>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            blobstore_config: PathBuf::from("/config/blobstore.conf"),
            web_listen_address: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 80),
            grpc_listen_address: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 8980),
            schedulers: Vec::new(),
            allow_ac_updates_for_instances: Vec::new(),
        }
    }
}

/// Parse a listen address. `:PORT` binds every interface.
pub fn parse_listen_address(address: &str) -> BbResult<SocketAddr> {
    if let Some(port) = address.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|_| {
            BbError::invalid_argument(format!("Invalid listen address: {}", address))
        })?;
        return Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));
    }
    address
        .parse::<SocketAddr>()
        .map_err(|e| BbError::invalid_argument(format!("Invalid listen address {}: {}", address, e)))
}
