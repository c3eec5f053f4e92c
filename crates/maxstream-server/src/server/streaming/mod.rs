//! Per-session stream processing.
//!
//! - [`session`] - the receive-evaluate-send loop run once per `Max` call.

pub mod session;
