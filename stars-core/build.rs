// SPDX-License-Identifier: MIT

/// Build script – compiles protobuf definitions into Rust source code.
///
/// tonic-build wraps prost-build; the generated file is written to
/// `OUT_DIR` and pulled into the crate via `tonic::include_proto!` in
/// `src/proto/mod.rs`.
///
/// Prerequisites
/// -------------
/// `protoc` (the protobuf compiler) must be available on `$PATH`, or its path
/// must be set in the `PROTOC` environment variable before running `cargo build`.
/// Install on Ubuntu/Debian: `sudo apt install -y protobuf-compiler`
/// Install on macOS:          `brew install protobuf`

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "proto";
    let proto_file = format!("{}/stars.proto", proto_root);

    println!("cargo:rerun-if-changed={}", proto_file);

    tonic_build::configure()
        // No tonic service is defined here — STaRS's transport contract is
        // a plain send/recv/timer trait (spec.md §4.7), not a gRPC service.
        .build_server(false)
        .build_client(false)
        // Derive serde Serialize/Deserialize on every generated message so
        // wire bytes can be produced outside prost too, e.g. for logging.
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(&[proto_file.as_str()], &[proto_root])?;

    Ok(())
}
