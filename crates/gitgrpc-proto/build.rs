//! Build script for gitgrpc-proto
//!
//! Compiles protobuf definitions using tonic-prost-build.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../../proto";

    let protos = ["gitgrpc/v1/git.proto"];

    let proto_paths: Vec<_> = protos
        .iter()
        .map(|p| format!("{proto_root}/{p}"))
        .collect();

    for path in &proto_paths {
        println!("cargo:rerun-if-changed={path}");
    }

    // `Git.Connect` would clash with the generated `GitClient::connect`
    // constructor; clients build their channel from an `Endpoint` instead.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .build_transport(false)
        .compile_protos(&proto_paths, &[proto_root.to_string()])?;

    Ok(())
}
