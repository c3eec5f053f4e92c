//! Error types for the running-maximum service.
//!
//! This module defines the central `Error` enum shared by the client and the
//! server. It implements `From<Error>` for `tonic::Status` so that session
//! failures reach the peer with an appropriate gRPC status code.
//!
//! ## Error Cases
//! - `Credentials`: TLS material could not be loaded (setup, fatal).
//! - `Transport`: dialing or serving failed (setup, fatal).
//! - `InvalidRequest`: configuration or arguments were rejected.
//! - `Rpc`: the peer or the transport failed an in-flight call.
//! - `ChannelError`: an internal task channel closed unexpectedly.
//! - `RequestCancelled`: the session was cancelled by its owner.
//! - `DeadlineExceeded`: the caller's deadline expired mid-session.
//! - `ServiceShutdown`: the server is shutting down.

use std::path::PathBuf;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the running-maximum service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A certificate, key or trust anchor could not be loaded.
    #[error("Cannot load credentials from {}: {reason}", path.display())]
    Credentials { path: PathBuf, reason: String },

    /// Dialing, binding or serving failed at the transport level.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The request or configuration was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The remote end or the transport failed the call.
    #[error("RPC failed: {}: {}", .0.code(), .0.message())]
    Rpc(#[from] Status),

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The session was cancelled before it completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The session outlived its deadline.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            e @ Error::Credentials { .. } => Status::failed_precondition(e.to_string()),
            Error::Transport(e) => Status::unavailable(format!("Transport error: {e}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Rpc(status) => status,
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
