//! Domain layer types and invariants.

pub mod family;
pub mod types;
