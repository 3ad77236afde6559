//! Cache-aside reads, domain events and rule-driven cache invalidation for
//! the Storyline writing backend.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
