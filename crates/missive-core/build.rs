/// Builds the gRPC client and server code for the `allocator.proto` definition
/// using `tonic-prost-build`.
///
/// # Files and Paths
///
/// - Proto file: `proto/allocator.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// Panics if code generation fails.
///
/// # Output
///
/// Generated code is exposed in Rust via:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("allocator");
/// }
/// ```
fn main() {
    tonic_prost_build::configure()
        .compile_protos(&["proto/allocator.proto"], &["proto"])
        .unwrap();
}
