//! Mallard Common - Core types and utilities shared across all crates
//!
//! This crate provides the foundational types used throughout Mallard:
//! - `LogicalType` / `PhysicalType`: The type system
//! - `Value`: Runtime value representation
//! - `Vector`, `DataChunk`, `ChunkCollection`: Columnar batches
//! - `Error`: Unified error types
//! - `Config`: Database configuration

pub mod chunk;
pub mod chunk_collection;
pub mod config;
pub mod error;
pub mod types;
pub mod value;
pub mod vector;

pub use chunk::DataChunk;
pub use chunk_collection::{ChunkCollection, OrderType};
pub use config::Config;
pub use error::{Error, Result};
pub use types::{ComparisonType, LogicalType, PhysicalType};
pub use value::Value;
pub use vector::{SelectionVector, ValidityMask, Vector};

/// Maximum number of rows in a vector or data chunk.
pub const STANDARD_VECTOR_SIZE: usize = 1024;

/// Identifier of a row within a table.
pub type RowId = u64;
