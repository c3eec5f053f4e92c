/// Builds the gRPC client and server code for `maxstream.proto` using
/// `tonic-prost-build`.
///
/// The generated bindings are written into the crate's `OUT_DIR` together with
/// an encoded file descriptor set (`maxstream_descriptor.bin`) that the server
/// registers with gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/maxstream.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// Panics if `OUT_DIR` is unset or code generation fails. Both mean the build
/// cannot continue, so there is nothing better to do than stop with the error.
///
/// # Output
///
/// Generated code is reachable through [`maxstream_core::proto`]:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("maxstream");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("maxstream_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/maxstream.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/maxstream.proto"], &["proto"])
        .unwrap();
}
