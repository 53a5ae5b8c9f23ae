use std::net::SocketAddr;
use std::path::PathBuf;

use bb_core::{parse_listen_address, InstanceName, SchedulerEntry, ServerOptions};
use clap::Parser;

/// Command line of the bb-storage process.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "bb-storage",
    version,
    about = "Content addressable storage, action cache and scheduler front end"
)]
pub struct Options {
    /// Configuration for blob storage
    #[arg(long = "blobstore-config", default_value = "/config/blobstore.conf")]
    pub blobstore_config: PathBuf,

    /// Address on which to expose metrics
    #[arg(long = "web.listen-address", default_value = ":80", value_parser = parse_listen_address)]
    pub web_listen_address: SocketAddr,

    /// Address on which to serve gRPC
    #[arg(long = "grpc.listen-address", default_value = ":8980", value_parser = parse_listen_address)]
    pub grpc_listen_address: SocketAddr,

    /// Backend capable of executing build actions. Example: debian8|hostname-of-debian8-scheduler:8981
    #[arg(long = "scheduler", value_name = "NAME|ENDPOINT")]
    pub schedulers: Vec<SchedulerEntry>,

    /// Allow clients to write into the action cache for this instance
    #[arg(long = "allow-ac-updates-for-instance", value_name = "NAME")]
    pub allow_ac_updates_for_instances: Vec<String>,
}

impl From<Options> for ServerOptions {
    fn from(options: Options) -> Self {
        Self {
            blobstore_config: options.blobstore_config,
            web_listen_address: options.web_listen_address,
            grpc_listen_address: options.grpc_listen_address,
            schedulers: options.schedulers,
            allow_ac_updates_for_instances: options
                .allow_ac_updates_for_instances
                .into_iter()
                .map(InstanceName::from)
                .collect(),
        }
    }
}
