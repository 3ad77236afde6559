//! Domain layer types and invariants.

pub mod continuity;
pub mod entities;
pub mod error;
pub mod types;
