use std::error::Error;

const PROTOS: &[&str] = &[
    "proto/build/bazel/semver/semver.proto",
    "proto/google/rpc/status.proto",
    "proto/google/longrunning/operations.proto",
    "proto/google/bytestream/bytestream.proto",
    "proto/build/bazel/remote/execution/v2/remote_execution.proto",
];

fn main() -> Result<(), Box<dyn Error>> {
    // Watch each schema file individually; directory watching only catches add/remove.
    for proto in PROTOS {
        println!("cargo:rerun-if-changed={}", proto);
    }

    // Use the vendored protoc so building does not depend on the host toolchain.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .bytes(["."])
        .compile_protos(PROTOS, &["proto"])?;

    Ok(())
}
