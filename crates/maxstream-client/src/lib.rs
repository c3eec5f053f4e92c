#![doc = include_str!("../README.md")]
//!
//! ## Module Overview
//!
//! - [`client::config`] - CLI and environment configuration.
//! - [`client::initiator`] - one `Max` session: paced sends, reported maxima,
//!   cancellation and deadline.
//! - [`client::telemetry`] - console logging.

pub mod client;
