// SPDX-License-Identifier: MIT

/// Proto-generated modules.
///
/// `tonic::include_proto!` expands to an `include!` of the file that
/// prost/tonic-build wrote into `OUT_DIR` during the build script.
pub mod stars_v1 {
    // Package name declared in stars.proto is `stars.v1`.
    tonic::include_proto!("stars.v1");
}
