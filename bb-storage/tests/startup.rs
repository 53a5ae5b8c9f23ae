use std::io::Write;
use std::net::SocketAddr;

use bb_core::{ErrorKind, InstanceName, ServerOptions};
use bb_storage::Options;
use clap::Parser;
use prometheus::Registry;

const CONFIG: &str = r#"{
    "content_addressable_storage": { "memory": {} },
    "action_cache": { "memory": {} }
}"#;

fn local_options(blobstore_config: std::path::PathBuf) -> ServerOptions {
    let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
    ServerOptions {
        blobstore_config,
        web_listen_address: loopback,
        grpc_listen_address: loopback,
        schedulers: Vec::new(),
        allow_ac_updates_for_instances: vec![InstanceName::from("main")],
    }
}

#[test]
fn options_defaults() {
    let options: ServerOptions = Options::try_parse_from(["bb-storage"]).unwrap().into();
    assert_eq!(options.blobstore_config.to_str(), Some("/config/blobstore.conf"));
    assert_eq!(options.web_listen_address.port(), 80);
    assert_eq!(options.grpc_listen_address.port(), 8980);
    assert!(options.schedulers.is_empty());
    assert!(options.allow_ac_updates_for_instances.is_empty());
}

#[test]
fn options_repeated_flags() {
    let options: ServerOptions = Options::try_parse_from([
        "bb-storage",
        "--blobstore-config",
        "/etc/bb/blobstore.json",
        "--web.listen-address",
        "127.0.0.1:7980",
        "--scheduler",
        "debian8|debian8-scheduler:8981",
        "--scheduler",
        "ubuntu|grpc://ubuntu-scheduler:8981",
        "--allow-ac-updates-for-instance",
        "debian8",
        "--allow-ac-updates-for-instance",
        "local",
    ])
    .unwrap()
    .into();

    assert_eq!(options.web_listen_address, "127.0.0.1:7980".parse().unwrap());
    let names: Vec<&str> = options
        .schedulers
        .iter()
        .map(|s| s.instance_name.as_str())
        .collect();
    assert_eq!(names, vec!["debian8", "ubuntu"]);
    assert_eq!(options.schedulers[0].endpoint_uri(), "http://debian8-scheduler:8981");
    assert_eq!(
        options.allow_ac_updates_for_instances,
        vec![InstanceName::from("debian8"), InstanceName::from("local")]
    );
}

#[test]
fn malformed_scheduler_entry_is_fatal() {
    let err = Options::try_parse_from(["bb-storage", "--scheduler", "debian8"]).unwrap_err();
    assert!(err.to_string().contains("Invalid scheduler entry"));

    assert!(Options::try_parse_from(["bb-storage", "--grpc.listen-address", "localhost"]).is_err());
}

#[tokio::test]
async fn missing_storage_configuration_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let options = local_options(dir.path().join("blobstore.conf"));
    let err = bb_storage::run(options, &Registry::new(), async {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to create blob access"));
}

#[tokio::test]
async fn bad_scheduler_endpoint_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let mut options = local_options(file.path().to_path_buf());
    options.schedulers.push(bb_core::SchedulerEntry {
        instance_name: InstanceName::from("debian8"),
        endpoint: "not an endpoint".to_string(),
    });
    let err = bb_storage::run(options, &Registry::new(), async {})
        .await
        .unwrap_err();
    let cause = err
        .chain()
        .find_map(|e| e.downcast_ref::<bb_core::BbError>())
        .unwrap();
    assert_eq!(cause.kind, ErrorKind::InvalidArgument);
    assert!(err.root_cause().downcast_ref::<bb_core::BbError>().is_none());
}

#[tokio::test]
async fn serves_until_shutdown() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let options = local_options(file.path().to_path_buf());
    bb_storage::run(options, &Registry::new(), async {})
        .await
        .unwrap();
}
