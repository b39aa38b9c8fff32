//! Batched footprint index builder.
//!
//! Splits a file list into batches, runs an external indexer over each batch
//! on a bounded worker pool, then merges the per-batch containers with an
//! external merge tool into one output file.

pub mod batch;
pub mod cli;
pub mod commands;
pub mod common;
pub mod config;
pub mod error;
pub mod merge;
pub mod tools;
pub mod workspace;

pub use error::BatcherError;
