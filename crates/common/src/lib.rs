//! Shared types, error definitions, and utilities used across all chunkhook crates.

pub mod error;
pub mod types;

pub use {
    error::{ChunkhookError, Error, FromMessage, Result},
    types::{ChunkId, ModuleId, PluginId},
};
