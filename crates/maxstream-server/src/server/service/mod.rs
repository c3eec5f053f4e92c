//! gRPC service implementation.
//!
//! - [`handler`] - gRPC service entry point (`MaxService`).

pub mod handler;
