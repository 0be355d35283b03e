//! Infrastructure adapters and runtime bootstrap.

pub mod client;
pub mod error;
pub mod preferences;
pub mod telemetry;
