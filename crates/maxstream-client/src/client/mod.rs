pub mod config;
pub mod initiator;
pub mod telemetry;
