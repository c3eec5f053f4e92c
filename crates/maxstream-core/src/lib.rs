#![doc = include_str!("../README.md")]

pub mod channel;
mod common;
pub mod tls;

pub use common::*;

/// gRPC service and message definitions generated from
/// `proto/maxstream.proto`.
///
/// ## Service
///
/// - `Math.Max` - one bidirectional stream per call. The caller sends
///   [`ValueMessage`]s and half-closes; the server answers with a
///   [`MaxMessage`] each time the running maximum strictly increases.
///
/// ## Invariants
///
/// - The `result` values of one call are strictly increasing.
/// - Every `result` equals some `num` the server received earlier in the same
///   call.
///
/// [`ValueMessage`]: crate::proto::ValueMessage
/// [`MaxMessage`]: crate::proto::MaxMessage
pub mod proto {
    tonic::include_proto!("maxstream");

    /// Encoded file descriptor set for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("maxstream_descriptor");
}
