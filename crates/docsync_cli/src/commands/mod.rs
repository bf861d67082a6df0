//! CLI command implementations.

pub mod blobs;
pub mod checkpoints;
pub mod schema;
